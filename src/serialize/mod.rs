// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::errors::Error;
use crate::mutation::{ascii_to_phred, phred_to_ascii, Mutation, ReadRecord};

fn is_gz(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Open a line-oriented input stream, transparently decoding `.gz`.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| Error::InputIo {
        path: path.to_owned(),
    })?;
    Ok(if is_gz(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// Open an output stream, stdout when no path is given, transparently
/// encoding `.gz`.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        None => Box::new(BufWriter::new(io::stdout())),
        Some(path) => {
            let file = File::create(path).with_context(|| Error::OutputIo {
                path: path.to_owned(),
            })?;
            if is_gz(path) {
                Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
            } else {
                Box::new(BufWriter::new(file))
            }
        }
    })
}

/// CR/LF and LF inputs are treated identically.
pub fn normalize_line(line: &str) -> &str {
    line.trim_end_matches('\r')
}

/// Write one read in the parsed-mutations format:
/// `<read_id> <left> <right> <target_seq> <target_qual> [<left> <right> "<seq>" "<qual>"]*`
pub fn write_read<W: Write>(out: &mut W, read: &ReadRecord) -> io::Result<()> {
    write!(
        out,
        "{} {} {} {} {}",
        read.read_id,
        read.left_target_pos,
        read.right_target_pos,
        String::from_utf8_lossy(&read.local_target_seq).to_ascii_uppercase(),
        phred_to_ascii(&read.local_target_qual),
    )?;
    for m in &read.mutations {
        write!(
            out,
            " {} {} \"{}\" \"{}\"",
            m.left,
            m.right,
            String::from_utf8_lossy(&m.seq),
            phred_to_ascii(&m.qual),
        )?;
    }
    writeln!(out)
}

/// Parse one line of the parsed-mutations format.
pub fn parse_read(line: &str, lineno: u64) -> Result<ReadRecord, Error> {
    let bad = |reason: String| Error::BadFormat {
        reason,
        line: Some(lineno),
    };
    let unquote = |field: &str| -> Result<String, Error> {
        if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
            Ok(field[1..field.len() - 1].to_owned())
        } else {
            Err(bad(format!("expected quoted field, got {:?}", field)))
        }
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(bad(format!(
            "expected at least 5 fields, got {}",
            fields.len()
        )));
    }
    if (fields.len() - 5) % 4 != 0 {
        return Err(bad(
            "mutation field count is not a multiple of four".to_owned(),
        ));
    }

    let parse_pos = |field: &str| -> Result<i64, Error> {
        field
            .parse()
            .map_err(|_| bad(format!("invalid position {:?}", field)))
    };
    let left_target_pos = parse_pos(fields[1])?;
    let right_target_pos = parse_pos(fields[2])?;
    let local_target_seq = fields[3].as_bytes().to_ascii_uppercase();
    let local_target_qual = ascii_to_phred(fields[4]);
    if local_target_seq.len() as i64 != right_target_pos - left_target_pos + 1 {
        return Err(bad(format!(
            "target sequence length {} does not match span {}..{}",
            local_target_seq.len(),
            left_target_pos,
            right_target_pos
        )));
    }
    if local_target_qual.len() != local_target_seq.len() {
        return Err(bad(
            "target qualities do not match target sequence".to_owned(),
        ));
    }

    let mut mutations = Vec::with_capacity((fields.len() - 5) / 4);
    for chunk in fields[5..].chunks(4) {
        let left = parse_pos(chunk[0])?;
        let right = parse_pos(chunk[1])?;
        if right <= left {
            return Err(bad(format!("invalid mutation interval {}..{}", left, right)));
        }
        if left < left_target_pos || right > right_target_pos {
            return Err(bad(format!(
                "mutation {}..{} outside target span {}..{}",
                left, right, left_target_pos, right_target_pos
            )));
        }
        let seq = unquote(chunk[2])?.into_bytes();
        let qual = ascii_to_phred(&unquote(chunk[3])?);
        if seq.len() != qual.len() {
            return Err(bad(
                "mutation qualities do not match mutation sequence".to_owned(),
            ));
        }
        mutations.push(Mutation::new(left, right, seq, qual));
    }

    Ok(ReadRecord {
        read_id: fields[0].to_owned(),
        left_target_pos,
        right_target_pos,
        local_target_seq,
        local_target_qual,
        mutations,
    })
}

/// Tab-separated writer for the counts table. Fields are written verbatim;
/// the variant groups carry literal quotes.
pub fn counts_writer(out: Box<dyn Write>) -> csv::Writer<Box<dyn Write>> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_read() -> ReadRecord {
        ReadRecord {
            read_id: "read1".to_owned(),
            left_target_pos: 10,
            right_target_pos: 17,
            local_target_seq: b"ACGTACGT".to_vec(),
            local_target_qual: vec![40; 8],
            mutations: vec![
                Mutation::new(11, 13, b"T".to_vec(), vec![38]),
                Mutation::new(14, 17, b"".to_vec(), vec![]),
            ],
        }
    }

    #[test]
    fn test_round_trip_is_identity() {
        let read = example_read();
        let mut buffer = Vec::new();
        write_read(&mut buffer, &read).unwrap();
        let line = String::from_utf8(buffer).unwrap();
        let parsed = parse_read(normalize_line(line.trim_end()), 1).unwrap();
        assert_eq!(parsed, read);

        // re-serializing the parsed record reproduces the line
        let mut again = Vec::new();
        write_read(&mut again, &parsed).unwrap();
        assert_eq!(String::from_utf8(again).unwrap(), line);
    }

    #[test]
    fn test_empty_substitution_serializes_as_quotes() {
        let read = example_read();
        let mut buffer = Vec::new();
        write_read(&mut buffer, &read).unwrap();
        let line = String::from_utf8(buffer).unwrap();
        assert!(line.contains("14 17 \"\" \"\""));
    }

    #[test]
    fn test_rejects_partial_mutation_fields() {
        let line = "read1 0 3 ACGT IIII 1 3 \"T\"";
        let err = parse_read(line, 7).unwrap_err();
        assert!(matches!(
            err,
            Error::BadFormat { line: Some(7), .. }
        ));
    }

    #[test]
    fn test_rejects_span_mismatch() {
        let line = "read1 0 4 ACGT IIII";
        assert!(parse_read(line, 1).is_err());
    }

    #[test]
    fn test_rejects_mutation_outside_target_span() {
        // anchored before the spanned region
        let line = "read1 5 8 ACGT IIII 0 2 \"T\" \"I\"";
        let err = parse_read(line, 3).unwrap_err();
        assert!(matches!(err, Error::BadFormat { line: Some(3), .. }));
        // and past its right end
        let line = "read1 5 8 ACGT IIII 7 9 \"T\" \"I\"";
        assert!(parse_read(line, 4).is_err());
    }

    #[test]
    fn test_crlf_is_normalized() {
        assert_eq!(normalize_line("a b c\r"), "a b c");
        assert_eq!(normalize_line("a b c"), "a b c");
    }
}
