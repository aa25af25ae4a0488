// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::PathBuf;

use anyhow::Result;
use bio::io::fasta;
use structopt::StructOpt;
use strum::VariantNames;
use strum_macros::{Display, EnumString, EnumVariantNames};

use crate::counting::{CountProcessorBuilder, ParseProcessorBuilder};
use crate::errors::Error;
use crate::filter::FilterParams;
use crate::mutation::MutationType;
use crate::shape::ShapeParams;

/// End of a multinucleotide event that the adduct site is inferred from.
/// Only the reverse-transcription direction (`right`) is supported.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumVariantNames)]
pub enum AdductSite {
    #[strum(serialize = "right")]
    Right,
    #[strum(serialize = "left")]
    Left,
}

#[derive(Debug, StructOpt, Serialize, Deserialize, Clone)]
#[structopt(
    name = "mapmut",
    about = "A mutation counting engine for RNA mutational profiling (MaP) data.",
    setting = structopt::clap::AppSettings::ColoredHelp,
)]
pub enum MapMut {
    #[structopt(
        name = "parse",
        about = "Parse aligned reads (SAM, SAM.gz or BAM) into the parsed-mutations stream.",
        setting = structopt::clap::AppSettings::ColoredHelp,
    )]
    Parse {
        #[structopt(parse(from_os_str), help = "Aligned reads; the MD tag is required.")]
        input: PathBuf,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Parsed-mutations output (STDOUT if omitted; gzipped for a .gz suffix)."
        )]
        output: Option<PathBuf>,
        #[structopt(
            long = "min-mapq",
            default_value = "30",
            help = "Minimum aligner-reported mapping quality to admit a read."
        )]
        min_mapq: u8,
        #[structopt(
            long = "skip-bad-records",
            help = "Log and drop malformed records instead of aborting."
        )]
        skip_bad_records: bool,
        #[structopt(
            long = "warn-on-no-mapped",
            help = "Downgrade the empty-input error to a warning."
        )]
        warn_on_no_mapped: bool,
    },
    #[structopt(
        name = "count",
        about = "Shape, filter and accumulate parsed mutations into a per-position counts table.",
        setting = structopt::clap::AppSettings::ColoredHelp,
    )]
    Count {
        #[structopt(
            long,
            parse(from_os_str),
            help = "Parsed-mutations input (STDIN if omitted; .gz transparently decoded)."
        )]
        input: Option<PathBuf>,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Counts table output (STDOUT if omitted; gzipped for a .gz suffix)."
        )]
        output: Option<PathBuf>,
        #[structopt(
            long = "min-qual",
            default_value = "30",
            help = "Phred threshold for a basecall and its neighbors."
        )]
        min_qual: u8,
        #[structopt(
            long = "exclude-3prime",
            default_value = "0",
            help = "Bases at the 3' read end excluded from mutations and effective depth."
        )]
        exclude_3prime: i64,
        #[structopt(
            long = "max-internal-match",
            default_value = "6",
            help = "Maximum unchanged-reference gap between mutations that still collapses \
                    into one multinucleotide event."
        )]
        max_internal_match: i64,
        #[structopt(long = "right-align-ambig-dels", help = "Shift ambiguous deletions 3'.")]
        right_align_ambig_dels: bool,
        #[structopt(long = "right-align-ambig-ins", help = "Shift ambiguous insertions 3'.")]
        right_align_ambig_ins: bool,
        #[structopt(
            long = "separate-ambig-counts",
            help = "Emit parallel _ambig columns instead of folding ambiguous events."
        )]
        separate_ambig_counts: bool,
        #[structopt(
            long = "mutation-type",
            default_value = "any",
            possible_values = &MutationType::VARIANTS,
            help = "Restrict which mutation classes count."
        )]
        mutation_type: MutationType,
        #[structopt(
            long = "variant-mode",
            help = "Count sequence variants for reference correction instead of adducts."
        )]
        variant_mode: bool,
        #[structopt(
            long = "max-variant-ins-len",
            default_value = "100",
            help = "Longest insertion retained per position in variant mode."
        )]
        max_variant_ins_len: usize,
        #[structopt(
            long = "input-is-sorted",
            help = "Input is sorted by leftmost position; stream rows as the window advances."
        )]
        input_is_sorted: bool,
        #[structopt(
            long = "seq-len",
            default_value = "0",
            help = "Force the output to this many positions (0: rightmost covered position)."
        )]
        seq_len: i64,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Reference FASTA; forces the output length to the reference length."
        )]
        reference: Option<PathBuf>,
        #[structopt(
            long = "adduct-site",
            default_value = "right",
            possible_values = &AdductSite::VARIANTS,
            help = "Event end the adduct site is inferred from."
        )]
        adduct_site: AdductSite,
        #[structopt(
            long,
            parse(from_os_str),
            help = "Write histogram tables to this path instead of the log."
        )]
        histograms: Option<PathBuf>,
        #[structopt(
            long = "skip-bad-records",
            help = "Log and drop malformed records instead of aborting."
        )]
        skip_bad_records: bool,
        #[structopt(
            long = "warn-on-empty",
            help = "Downgrade the empty-input error to a warning."
        )]
        warn_on_empty: bool,
    },
}

pub fn run(opt: MapMut) -> Result<()> {
    // keep the effective configuration in the log
    info!("options: {}", serde_json::to_string(&opt)?);

    match opt {
        MapMut::Parse {
            input,
            output,
            min_mapq,
            skip_bad_records,
            warn_on_no_mapped,
        } => ParseProcessorBuilder::default()
            .input(&input)?
            .output(output.as_ref())?
            .min_mapq(min_mapq)
            .skip_bad_records(skip_bad_records)
            .warn_on_no_mapped(warn_on_no_mapped)
            .build()?
            .process(),
        MapMut::Count {
            input,
            output,
            min_qual,
            exclude_3prime,
            max_internal_match,
            right_align_ambig_dels,
            right_align_ambig_ins,
            separate_ambig_counts,
            mutation_type,
            variant_mode,
            max_variant_ins_len,
            input_is_sorted,
            seq_len,
            reference,
            adduct_site,
            histograms,
            skip_bad_records,
            warn_on_empty,
        } => {
            let invalid = |option: &str| -> anyhow::Error {
                Error::ConfigInvalid {
                    option: option.to_owned(),
                }
                .into()
            };
            // Phred 93 is the largest value ASCII-33 can carry
            if min_qual > 93 {
                return Err(invalid("min-qual"));
            }
            if exclude_3prime < 0 {
                return Err(invalid("exclude-3prime"));
            }
            if max_internal_match < 0 {
                return Err(invalid("max-internal-match"));
            }
            if seq_len < 0 || (seq_len > 0 && reference.is_some()) {
                return Err(invalid("seq-len"));
            }
            if adduct_site == AdductSite::Left {
                return Err(invalid("adduct-site"));
            }
            let seq_len = match reference {
                Some(ref path) => reference_len(path)?,
                None => seq_len,
            };

            CountProcessorBuilder::default()
                .input(input.as_ref())?
                .output(output.as_ref())?
                .counting_mode(variant_mode, separate_ambig_counts, max_variant_ins_len)
                .shape_params(ShapeParams {
                    exclude_3prime,
                    max_internal_match,
                    right_align_ambig_dels,
                    right_align_ambig_ins,
                })
                .filter_params(FilterParams {
                    min_qual,
                    exclude_3prime,
                    mutation_type,
                    variant_mode,
                })
                .input_is_sorted(input_is_sorted)
                .seq_len(seq_len)
                .skip_bad_records(skip_bad_records)
                .warn_on_empty(warn_on_empty)
                .histograms(histograms)
                .build()?
                .process()
        }
    }
}

/// Length of the first (and for MaP pipelines, only) reference sequence.
fn reference_len(path: &PathBuf) -> Result<i64> {
    let reader = fasta::Reader::from_file(path)?;
    let mut records = reader.records();
    let first = records
        .next()
        .ok_or_else(|| Error::EmptyInput { path: path.clone() })??;
    if records.next().is_some() {
        warn!(
            "{} contains more than one sequence; using the length of {}",
            path.display(),
            first.id()
        );
    }
    Ok(first.seq().len() as i64)
}
