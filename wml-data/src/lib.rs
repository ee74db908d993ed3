//! Daily aggregation of reservoir observations.
//!
//! The [`aggregator`] accumulates streamed observations by date and
//! reservoir; the [`report`] module turns a flush of that state into
//! per-date JSON and CSV files.

pub mod aggregator;
pub mod report;

pub use aggregator::{Aggregator, AggregatorState, DailyBucket, MessageOutcome, SummaryRow};
