//! Lazy CSV observation source.
//!
//! Expected format (with headers): `Date,TAF`
//!
//! # Example CSV
//! ```text
//! Date,TAF
//! 09/29/2024,2720.0
//! ```

use crate::{
    error::{MalformedRecordError, SourceError},
    observation::{normalize, Observation, RawRecord},
};
use csv::{DeserializeRecordsIntoIter, ReaderBuilder};
use log::debug;
use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "TAF")]
    taf: Option<String>,
}

/// Yields one normalized observation per CSV row, reading rows on demand.
///
/// A malformed row yields an `Err` and iteration continues with the next
/// row. Opening the same path again starts over from the first row.
pub struct ObservationSource<R: Read> {
    reservoir_id: String,
    rows: DeserializeRecordsIntoIter<R, CsvRow>,
}

impl ObservationSource<File> {
    pub fn open(path: impl AsRef<Path>, reservoir_id: &str) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| SourceError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Reading {} observations from {}", reservoir_id, path.display());
        Ok(ObservationSource {
            reservoir_id: reservoir_id.to_string(),
            rows: reader.into_deserialize(),
        })
    }
}

impl<R: Read> ObservationSource<R> {
    pub fn from_reader(reader: R, reservoir_id: &str) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        ObservationSource {
            reservoir_id: reservoir_id.to_string(),
            rows: reader.into_deserialize(),
        }
    }
}

impl<R: Read> Iterator for ObservationSource<R> {
    type Item = Result<Observation, MalformedRecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };
        Some(normalize(RawRecord::from_csv_row(
            &self.reservoir_id,
            row.date,
            row.taf,
        )))
    }
}
