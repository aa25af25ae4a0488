// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

pub mod md;

use regex::Regex;
use rust_htslib::bam;
use rust_htslib::bam::record::Cigar;

use crate::errors::Error;
use crate::mutation::{Mutation, ReadRecord};
use crate::parse::md::{md_ops, MdColumn, MdCursor};

lazy_static! {
    static ref CIGAR_RE: Regex = Regex::new(r"([0-9]+)([MIDNSHP=X])").unwrap();
}

/// One CIGAR operation, reduced to what the parser distinguishes. `M`, `=`
/// and `X` all consume query and reference alike; the MD tag resolves
/// matches from mismatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CigarOp {
    Aln(u32),
    Ins(u32),
    Del(u32),
    SoftClip(u32),
    HardClip(u32),
}

impl CigarOp {
    fn ref_len(self) -> i64 {
        match self {
            CigarOp::Aln(l) | CigarOp::Del(l) => i64::from(l),
            _ => 0,
        }
    }
}

/// Parse a CIGAR string, rejecting operations the counting engine does not
/// support (reference skips and padding).
pub fn parse_cigar(cigar: &str, line: Option<u64>) -> Result<Vec<CigarOp>, Error> {
    let bad = |reason: String| Error::BadFormat { reason, line };
    let mut ops = Vec::new();
    let mut matched_len = 0;
    for captures in CIGAR_RE.captures_iter(cigar) {
        let whole = captures.get(0).unwrap();
        matched_len += whole.end() - whole.start();
        let len: u32 = captures[1]
            .parse()
            .map_err(|_| bad(format!("invalid CIGAR length in {:?}", cigar)))?;
        ops.push(match &captures[2] {
            "M" | "=" | "X" => CigarOp::Aln(len),
            "I" => CigarOp::Ins(len),
            "D" => CigarOp::Del(len),
            "S" => CigarOp::SoftClip(len),
            "H" => CigarOp::HardClip(len),
            op => return Err(bad(format!("unsupported CIGAR operation {:?}", op))),
        });
    }
    // anything the regex did not grab makes the CIGAR invalid
    if matched_len != cigar.len() {
        return Err(bad(format!("invalid CIGAR string {:?}", cigar)));
    }
    Ok(ops)
}

/// The aligner-independent input record of the parsing stage: everything the
/// engine needs from one alignment, regardless of whether it came from a BAM
/// record or a SAM text line.
#[derive(Clone, Debug)]
pub struct AlignedRecord {
    pub read_id: String,
    /// Leftmost 0-based reference position.
    pub pos: i64,
    /// Half-open reference end.
    pub end_pos: i64,
    pub seq: Vec<u8>,
    /// Numeric Phred basecall qualities, one per query base.
    pub qual: Vec<u8>,
    pub cigar: Vec<CigarOp>,
    pub md: Option<String>,
    pub mapq: u8,
}

/// Build an `AlignedRecord` from a SAM text line. Returns `None` for
/// unmapped, secondary and supplementary records.
pub fn record_from_sam_line(line: &str, lineno: u64) -> Result<Option<AlignedRecord>, Error> {
    let bad = |reason: String| Error::BadFormat {
        reason,
        line: Some(lineno),
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 11 {
        return Err(bad(format!("expected at least 11 fields, got {}", fields.len())));
    }
    let flags: u16 = fields[1]
        .parse()
        .map_err(|_| bad(format!("invalid FLAG field {:?}", fields[1])))?;
    if flags & 0x4 != 0 || flags & 0x100 != 0 || flags & 0x800 != 0 {
        return Ok(None);
    }
    let pos: i64 = fields[3]
        .parse::<i64>()
        .map_err(|_| bad(format!("invalid POS field {:?}", fields[3])))?
        - 1;
    if pos < 0 {
        return Err(bad("mapped record without a position".to_owned()));
    }
    let mapq: u8 = fields[4]
        .parse()
        .map_err(|_| bad(format!("invalid MAPQ field {:?}", fields[4])))?;
    let cigar = parse_cigar(fields[5], Some(lineno))?;
    if fields[9] == "*" || fields[10] == "*" {
        return Err(bad("record without sequence or basecall qualities".to_owned()));
    }
    let seq = fields[9].as_bytes().to_ascii_uppercase();
    let qual: Vec<u8> = fields[10].bytes().map(|q| q.saturating_sub(33)).collect();
    let md = fields[11..]
        .iter()
        .find_map(|tag| tag.strip_prefix("MD:Z:").map(|md| md.to_owned()));
    let end_pos = pos + cigar.iter().map(|op| op.ref_len()).sum::<i64>();

    Ok(Some(AlignedRecord {
        read_id: fields[0].to_owned(),
        pos,
        end_pos,
        seq,
        qual,
        cigar,
        md,
        mapq,
    }))
}

/// Build an `AlignedRecord` from a BAM record. Returns `None` for unmapped,
/// secondary and supplementary records.
pub fn record_from_bam(record: &bam::Record) -> Result<Option<AlignedRecord>, Error> {
    if record.is_unmapped() || record.is_secondary() || record.is_supplementary() {
        return Ok(None);
    }
    let read_id = String::from_utf8_lossy(record.qname()).into_owned();
    let mut cigar = Vec::new();
    for c in record.cigar().iter() {
        cigar.push(match *c {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => CigarOp::Aln(l),
            Cigar::Ins(l) => CigarOp::Ins(l),
            Cigar::Del(l) => CigarOp::Del(l),
            Cigar::SoftClip(l) => CigarOp::SoftClip(l),
            Cigar::HardClip(l) => CigarOp::HardClip(l),
            Cigar::RefSkip(_) | Cigar::Pad(_) => {
                return Err(Error::BadFormat {
                    reason: format!("unsupported CIGAR operation in read {}", read_id),
                    line: None,
                })
            }
        });
    }
    let md = record
        .aux(b"MD")
        .map(|aux| String::from_utf8_lossy(aux.string()).into_owned());
    let pos = record.pos();
    let end_pos = pos + cigar.iter().map(|op| op.ref_len()).sum::<i64>();

    Ok(Some(AlignedRecord {
        read_id,
        pos,
        end_pos,
        seq: record.seq().as_bytes().to_ascii_uppercase(),
        qual: record.qual().to_vec(),
        cigar,
        md,
        mapq: record.mapq(),
    }))
}

struct Run {
    left: i64,
    seq: Vec<u8>,
    qual: Vec<u8>,
}

/// Reconstruct the local target sequence and qualities from CIGAR and MD and
/// emit one `Mutation` per maximal run of non-matching columns. Ambiguously
/// placeable indels are widened to the union of their placements so that the
/// ambiguity survives in the mutation geometry.
pub fn parse_aligned_record(record: &AlignedRecord) -> Result<ReadRecord, Error> {
    let md = record.md.as_ref().ok_or_else(|| Error::MissingMdTag {
        read_id: record.read_id.clone(),
    })?;
    let mismatch = || Error::CigarMdMismatch {
        read_id: record.read_id.clone(),
    };
    let bad = |reason: String| Error::BadFormat { reason, line: None };

    let mut cursor = MdCursor::new(md_ops(md)?);
    let span = (record.end_pos - record.pos) as usize;
    let mut target = Vec::with_capacity(span);
    let mut target_qual = Vec::with_capacity(span);
    let mut mutations = Vec::new();
    let mut run: Option<Run> = None;
    let mut qpos = 0usize;
    let mut tpos = record.pos;

    let close_run = |run: &mut Option<Run>, right: i64, mutations: &mut Vec<Mutation>| {
        if let Some(r) = run.take() {
            if r.left < record.pos {
                // no unchanged anchor exists left of the alignment start
                debug!(
                    "read {}: dropping unanchored leading mutation",
                    record.read_id
                );
            } else {
                mutations.push(Mutation::new(r.left, right, r.seq, r.qual));
            }
        }
    };

    for op in &record.cigar {
        match *op {
            CigarOp::SoftClip(l) => {
                qpos += l as usize;
            }
            CigarOp::HardClip(_) => {}
            CigarOp::Aln(l) => {
                for _ in 0..l {
                    let column = cursor.next_column().ok_or_else(mismatch)?;
                    let read_base = *record.seq.get(qpos).ok_or_else(|| {
                        bad(format!("CIGAR overruns query in read {}", record.read_id))
                    })?;
                    let read_qual = record.qual[qpos];
                    match column {
                        MdColumn::Match => {
                            close_run(&mut run, tpos, &mut mutations);
                            target.push(read_base);
                            target_qual.push(read_qual);
                        }
                        MdColumn::Sub(ref_base) => {
                            target.push(ref_base.to_ascii_uppercase());
                            target_qual.push(read_qual);
                            let r = run.get_or_insert_with(|| Run {
                                left: tpos - 1,
                                seq: Vec::new(),
                                qual: Vec::new(),
                            });
                            r.seq.push(read_base);
                            r.qual.push(read_qual);
                        }
                    }
                    qpos += 1;
                    tpos += 1;
                }
            }
            CigarOp::Ins(l) => {
                let r = run.get_or_insert_with(|| Run {
                    left: tpos - 1,
                    seq: Vec::new(),
                    qual: Vec::new(),
                });
                for _ in 0..l {
                    let read_base = *record.seq.get(qpos).ok_or_else(|| {
                        bad(format!("CIGAR overruns query in read {}", record.read_id))
                    })?;
                    r.seq.push(read_base);
                    r.qual.push(record.qual[qpos]);
                    qpos += 1;
                }
            }
            CigarOp::Del(l) => {
                let deleted = cursor.next_deletion(l).ok_or_else(mismatch)?;
                run.get_or_insert_with(|| Run {
                    left: tpos - 1,
                    seq: Vec::new(),
                    qual: Vec::new(),
                });
                for base in deleted {
                    target.push(base.to_ascii_uppercase());
                    // deleted positions carry no basecall
                    target_qual.push(0);
                }
                tpos += i64::from(l);
            }
        }
    }
    if run.is_some() {
        // no unchanged anchor exists right of the alignment end
        debug!(
            "read {}: dropping unanchored trailing mutation",
            record.read_id
        );
    }

    if qpos != record.seq.len() {
        return Err(bad(format!(
            "CIGAR covers {} query bases but read {} has {}",
            qpos,
            record.read_id,
            record.seq.len()
        )));
    }
    if !cursor.is_exhausted() {
        return Err(mismatch());
    }
    if tpos != record.end_pos {
        return Err(bad(format!(
            "reconstructed alignment end {} differs from declared end {} for read {}",
            tpos, record.end_pos, record.read_id
        )));
    }

    widen_ambiguous(&mut mutations, &target, &target_qual, record.pos);

    Ok(ReadRecord {
        read_id: record.read_id.clone(),
        left_target_pos: record.pos,
        right_target_pos: record.end_pos - 1,
        local_target_seq: target,
        local_target_qual: target_qual,
        mutations,
    })
}

/// Widen every pure indel that could be placed in more than one way to the
/// union interval of its placements, absorbing the flanking reference matches
/// into `seq`/`qual`. Sliding is bounded by the adjacent mutations' anchors
/// and the local target edges.
fn widen_ambiguous(
    mutations: &mut Vec<Mutation>,
    target: &[u8],
    target_qual: &[u8],
    left_target_pos: i64,
) {
    let end = left_target_pos + target.len() as i64;
    let at = |p: i64| target[(p - left_target_pos) as usize];
    let qat = |p: i64| target_qual[(p - left_target_pos) as usize];

    for i in 0..mutations.len() {
        let min_left_anchor = if i > 0 {
            mutations[i - 1].right
        } else {
            left_target_pos
        };
        let max_right_anchor = if i + 1 < mutations.len() {
            mutations[i + 1].left
        } else {
            end - 1
        };
        let m = &mutations[i];
        let d = m.ref_span();
        let n = m.seq.len() as i64;

        if n == 0 && d > 0 {
            // pure gap over reference interval [a, b)
            let (a, b) = (m.left + 1, m.right);
            let (mut a2, mut b2) = (a, b);
            while a2 - 2 >= min_left_anchor && at(a2 - 1) == at(b2 - 1) {
                a2 -= 1;
                b2 -= 1;
            }
            let (mut a3, mut b3) = (a, b);
            while b3 + 1 <= max_right_anchor && at(b3) == at(a3) {
                a3 += 1;
                b3 += 1;
            }
            if a2 == a && b3 == b {
                continue;
            }
            let mut seq = Vec::new();
            let mut qual = Vec::new();
            for p in (a2..a).chain(b..b3) {
                seq.push(at(p));
                qual.push(qat(p));
            }
            mutations[i] = Mutation::new(a2 - 1, b3, seq, qual);
        } else if d == 0 && n > 0 {
            // pure insertion before reference position p
            let p = m.right;
            let mut p2 = p;
            let mut rotated = m.seq.clone();
            while p2 - 2 >= min_left_anchor && at(p2 - 1) == *rotated.last().unwrap() {
                rotated.pop();
                rotated.insert(0, at(p2 - 1));
                p2 -= 1;
            }
            let mut p3 = p;
            let mut rotated = m.seq.clone();
            while p3 + 1 <= max_right_anchor && at(p3) == rotated[0] {
                rotated.remove(0);
                rotated.push(at(p3));
                p3 += 1;
            }
            if p2 == p && p3 == p {
                continue;
            }
            let mut seq = Vec::new();
            let mut qual = Vec::new();
            for q in p2..p {
                seq.push(at(q));
                qual.push(qat(q));
            }
            seq.extend_from_slice(&m.seq);
            qual.extend_from_slice(&m.qual);
            for q in p..p3 {
                seq.push(at(q));
                qual.push(qat(q));
            }
            mutations[i] = Mutation::new(p2 - 1, p3, seq, qual);
        }
    }
}
