// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use derive_builder::Builder;
use rust_htslib::bam;
use rust_htslib::bam::Read;

use crate::errors::Error;
use crate::filter::{filter_read, FilterOutcome, FilterParams};
use crate::histogram::Histogram;
use crate::mutation::ReadRecord;
use crate::parse::{parse_aligned_record, record_from_bam, record_from_sam_line, AlignedRecord};
use crate::scan::counts::{ClassCounts, CountContribution, CountsParams};
use crate::scan::variants::{VariantContribution, VariantCounts, VariantKey, VariantParams};
use crate::scan::{PositionRecord, ScanWindow};
use crate::serialize;
use crate::shape::{shape, ShapeParams};

/// Per-read failures that "skip bad records" mode may drop instead of
/// aborting the run.
fn is_skippable(error: &Error) -> bool {
    matches!(
        error,
        Error::BadFormat { .. }
            | Error::MissingMdTag { .. }
            | Error::CigarMdMismatch { .. }
            | Error::Malformed { .. }
    )
}

enum ParseInput {
    Bam(bam::Reader),
    Sam(Box<dyn BufRead>),
}

#[derive(Default)]
struct ParseStats {
    mapped: u64,
    low_mapq: u64,
    written: u64,
    bad: u64,
}

/// First pipeline stage: turn aligned records (BAM or SAM text) into the
/// parsed-mutations stream.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct ParseProcessor {
    #[builder(private)]
    source: ParseInput,
    #[builder(private)]
    sink: Box<dyn Write>,
    #[builder(private)]
    input_path: PathBuf,
    min_mapq: u8,
    skip_bad_records: bool,
    warn_on_no_mapped: bool,
}

impl ParseProcessorBuilder {
    pub fn input<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = if path.extension().map_or(false, |ext| ext == "bam") {
            ParseInput::Bam(bam::Reader::from_path(path).with_context(|| {
                Error::InputIo {
                    path: path.to_owned(),
                }
            })?)
        } else {
            ParseInput::Sam(serialize::open_input(path)?)
        };
        Ok(self.input_path(path.to_owned()).source(source))
    }

    pub fn output<P: AsRef<Path>>(self, path: Option<P>) -> Result<Self> {
        Ok(self.sink(serialize::open_output(path.as_ref().map(|p| p.as_ref()))?))
    }
}

fn emit_parsed(
    parsed: Result<Option<AlignedRecord>, Error>,
    min_mapq: u8,
    skip_bad_records: bool,
    sink: &mut Box<dyn Write>,
    stats: &mut ParseStats,
) -> Result<()> {
    let aligned = match parsed {
        Ok(Some(aligned)) => aligned,
        Ok(None) => return Ok(()),
        Err(error) => {
            if skip_bad_records && is_skippable(&error) {
                warn!("skipping bad record: {}", error);
                stats.bad += 1;
                return Ok(());
            }
            return Err(error.into());
        }
    };
    stats.mapped += 1;
    if aligned.mapq < min_mapq {
        stats.low_mapq += 1;
        return Ok(());
    }
    match parse_aligned_record(&aligned) {
        Ok(read) => {
            serialize::write_read(sink, &read)?;
            stats.written += 1;
        }
        Err(error) => {
            if skip_bad_records && is_skippable(&error) {
                warn!("skipping read {}: {}", aligned.read_id, error);
                stats.bad += 1;
            } else {
                return Err(error.into());
            }
        }
    }
    Ok(())
}

impl ParseProcessor {
    pub fn process(&mut self) -> Result<()> {
        let mut stats = ParseStats::default();

        match self.source {
            ParseInput::Bam(ref mut reader) => {
                let mut record = bam::Record::new();
                while let Some(result) = reader.read(&mut record) {
                    result?;
                    emit_parsed(
                        record_from_bam(&record),
                        self.min_mapq,
                        self.skip_bad_records,
                        &mut self.sink,
                        &mut stats,
                    )?;
                }
            }
            ParseInput::Sam(ref mut reader) => {
                let mut line = String::new();
                let mut lineno = 0u64;
                loop {
                    line.clear();
                    if reader.read_line(&mut line)? == 0 {
                        break;
                    }
                    lineno += 1;
                    let trimmed = serialize::normalize_line(line.trim_end_matches('\n'));
                    if trimmed.is_empty() || trimmed.starts_with('@') {
                        continue;
                    }
                    emit_parsed(
                        record_from_sam_line(trimmed, lineno),
                        self.min_mapq,
                        self.skip_bad_records,
                        &mut self.sink,
                        &mut stats,
                    )?;
                }
            }
        }

        self.sink.flush()?;
        info!(
            "{} mapped reads, {} written, {} below MAPQ threshold, {} bad",
            stats.mapped, stats.written, stats.low_mapq, stats.bad
        );
        if stats.mapped == 0 {
            let error = Error::EmptyInput {
                path: self.input_path.clone(),
            };
            if self.warn_on_no_mapped {
                warn!("{}", error);
            } else {
                return Err(error.into());
            }
        }
        Ok(())
    }
}

/// The two per-position record types behind one scanning component.
enum Counter {
    Classes(ScanWindow<ClassCounts>),
    Variants(ScanWindow<VariantCounts>),
}

/// Second pipeline stage: shape, filter and accumulate parsed reads into the
/// per-position counts table plus histograms.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct CountProcessor {
    #[builder(private)]
    reader: Box<dyn BufRead>,
    #[builder(private)]
    writer: csv::Writer<Box<dyn Write>>,
    #[builder(private)]
    input_path: PathBuf,
    #[builder(private)]
    counter: Counter,
    shape_params: ShapeParams,
    filter_params: FilterParams,
    input_is_sorted: bool,
    /// Forced output length; 0 means the rightmost covered position decides.
    seq_len: i64,
    skip_bad_records: bool,
    warn_on_empty: bool,
    histograms: Option<PathBuf>,
}

impl CountProcessorBuilder {
    pub fn input<P: AsRef<Path>>(self, path: Option<P>) -> Result<Self> {
        Ok(match path {
            Some(path) => {
                let path = path.as_ref();
                self.input_path(path.to_owned())
                    .reader(serialize::open_input(path)?)
            }
            None => self
                .input_path(PathBuf::from("-"))
                .reader(Box::new(BufReader::new(io::stdin()))),
        })
    }

    pub fn output<P: AsRef<Path>>(self, path: Option<P>) -> Result<Self> {
        Ok(self.writer(serialize::counts_writer(serialize::open_output(
            path.as_ref().map(|p| p.as_ref()),
        )?)))
    }

    /// Select the per-position record type and its parameters.
    pub fn counting_mode(
        self,
        variant_mode: bool,
        separate_ambig: bool,
        max_ins_len: usize,
    ) -> Self {
        if variant_mode {
            self.counter(Counter::Variants(ScanWindow::new(
                0,
                VariantParams { max_ins_len },
            )))
        } else {
            self.counter(Counter::Classes(ScanWindow::new(
                0,
                CountsParams { separate_ambig },
            )))
        }
    }
}

fn ingest_classes(window: &mut ScanWindow<ClassCounts>, read: &ReadRecord, outcome: &FilterOutcome) {
    let left = read.left_target_pos;
    for pos in left..left + read.target_len() as i64 {
        window.update(pos, CountContribution::ReadDepth);
    }
    for (offset, _) in outcome.effective_depth.iter().enumerate().filter(|(_, &b)| b) {
        window.update(left + offset as i64, CountContribution::EffectiveDepth);
    }
    for m in &outcome.included {
        window.update(
            m.inner.adduct_site(),
            CountContribution::Class {
                class: m.tag.expect("bug: included mutation without tag"),
                ambig: m.ambig,
            },
        );
    }
}

fn ingest_variants(
    window: &mut ScanWindow<VariantCounts>,
    read: &ReadRecord,
    outcome: &FilterOutcome,
) {
    let left = read.left_target_pos;
    for (offset, _) in outcome.effective_depth.iter().enumerate().filter(|(_, &b)| b) {
        window.update(left + offset as i64, VariantContribution::Depth);
    }
    for m in &outcome.included {
        window.update(
            m.inner.adduct_site(),
            VariantContribution::Observation(VariantKey::from(&m.inner)),
        );
    }
}

impl CountProcessor {
    pub fn process(mut self) -> Result<()> {
        let mut read_lengths = Histogram::read_lengths();
        let mut mutations_per_read = Histogram::mutations_per_read();

        match &self.counter {
            Counter::Classes(window) => self
                .writer
                .write_record(ClassCounts::header(window.params()))?,
            Counter::Variants(window) => self
                .writer
                .write_record(VariantCounts::header(window.params()))?,
        }

        let mut n_reads = 0u64;
        let mut lineno = 0u64;
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            lineno += 1;
            let trimmed = serialize::normalize_line(line.trim_end_matches('\n'));
            if trimmed.is_empty() {
                continue;
            }

            let outcome = serialize::parse_read(trimmed, lineno).and_then(|read| {
                let shaped = shape(&read, &self.shape_params)?;
                Ok((filter_read(&read, shaped, &self.filter_params), read))
            });
            let (outcome, read) = match outcome {
                Ok(result) => result,
                Err(error) => {
                    if self.skip_bad_records && is_skippable(&error) {
                        warn!("skipping record: {}", error);
                        continue;
                    }
                    return Err(error.into());
                }
            };

            if self.input_is_sorted {
                // a lagging read never moves the origin backwards; its
                // out-of-window portion is dropped at the accumulator boundary
                match &mut self.counter {
                    Counter::Classes(window) => {
                        let new_left = read.left_target_pos.max(window.origin());
                        window.advance_left(new_left, &mut self.writer)?
                    }
                    Counter::Variants(window) => {
                        let new_left = read.left_target_pos.max(window.origin());
                        window.advance_left(new_left, &mut self.writer)?
                    }
                }
            }
            match &mut self.counter {
                Counter::Classes(window) => ingest_classes(window, &read, &outcome),
                Counter::Variants(window) => ingest_variants(window, &read, &outcome),
            }

            read_lengths.record(read.target_len() as u32);
            mutations_per_read.record(outcome.included.len() as u32);
            n_reads += 1;
            if n_reads % 100_000 == 0 {
                info!("{} reads processed.", n_reads);
            }
        }

        if n_reads == 0 {
            let error = Error::EmptyInput {
                path: self.input_path.clone(),
            };
            if self.warn_on_empty {
                warn!("{}", error);
            } else {
                return Err(error.into());
            }
        }

        match &mut self.counter {
            Counter::Classes(window) => {
                let end = if self.seq_len > 0 { self.seq_len } else { window.right() };
                window.finish(end, &mut self.writer)?;
            }
            Counter::Variants(window) => {
                let end = if self.seq_len > 0 { self.seq_len } else { window.right() };
                window.finish(end, &mut self.writer)?;
            }
        }
        self.writer.flush()?;
        info!("{} reads counted.", n_reads);

        match &self.histograms {
            Some(path) => {
                let mut out = serialize::open_output(Some(path.as_path()))?;
                write!(out, "{}\n{}", read_lengths, mutations_per_read)?;
                out.flush()?;
            }
            None => {
                info!("{}", read_lengths);
                info!("{}", mutations_per_read);
            }
        }
        Ok(())
    }
}
