//! Core types for reservoir storage (WML) feeds.
//!
//! Observations enter the system either as CSV rows or as JSON bus payloads;
//! both paths go through [`observation::normalize`] before anything else
//! touches them.

pub mod dates;
pub mod error;
pub mod observation;
pub mod payload;
pub mod source;
pub mod topic;

pub use error::{MalformedRecordError, SourceError};
pub use observation::{normalize, Observation, RawRecord, RawVolume};
