/// Error types for reservoir observation feeds
use std::path::PathBuf;
use thiserror::Error;

/// A CSV row or bus payload that cannot become an [`Observation`](crate::Observation).
///
/// Always recoverable: the record is dropped and the feed carries on.
#[derive(Error, Debug)]
pub enum MalformedRecordError {
    /// A required field is absent, null or blank
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Date is neither YYYY-MM-DD nor MM/DD/YYYY
    #[error("unparseable date `{0}` (expected YYYY-MM-DD or MM/DD/YYYY)")]
    InvalidDate(String),

    /// Volume is not a finite number
    #[error("volume `{0}` is not a finite number")]
    InvalidVolume(String),

    /// Payload is not a JSON object of the expected shape
    #[error("failed to decode payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// CSV row could not be read
    #[error("failed to read CSV row: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure to open an observation source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
