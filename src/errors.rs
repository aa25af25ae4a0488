use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("unable to read from {path}")]
    InputIo { path: PathBuf },
    #[error("unable to write to {path}")]
    OutputIo { path: PathBuf },
    #[error(
        "invalid record{}: {reason}",
        .line.map(|l| format!(" at line {}", l)).unwrap_or_default()
    )]
    BadFormat { reason: String, line: Option<u64> },
    #[error("read {read_id} carries no MD tag; realign with an aligner that emits MD")]
    MissingMdTag { read_id: String },
    #[error("CIGAR and MD tag disagree for read {read_id}")]
    CigarMdMismatch { read_id: String },
    #[error("malformed mutation {mutation}: reference window and substitution are both empty")]
    Malformed { mutation: String },
    #[error("position {position} lies left of the scan window origin {window}")]
    OutOfWindow { position: i64, window: i64 },
    #[error("invalid value for option --{option}")]
    ConfigInvalid { option: String },
    #[error("no mapped reads found in {path}")]
    EmptyInput { path: PathBuf },
}
