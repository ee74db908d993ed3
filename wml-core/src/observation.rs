use crate::{dates, error::MalformedRecordError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single storage reading for one reservoir on one civil date.
///
/// Only produced by [`normalize`], so every instance has a non-empty
/// reservoir id and a finite volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub reservoir_id: String,
    pub date: NaiveDate,
    /// Storage in thousand acre-feet (TAF)
    pub volume: f64,
}

/// Volume as it arrives: JSON payloads carry a number, CSV rows carry text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawVolume {
    Number(f64),
    Text(String),
}

impl fmt::Display for RawVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawVolume::Number(n) => write!(f, "{}", n),
            RawVolume::Text(s) => write!(f, "{}", s),
        }
    }
}

impl RawVolume {
    fn to_finite(&self) -> Option<f64> {
        let value = match self {
            RawVolume::Number(n) => *n,
            RawVolume::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }

    fn is_blank(&self) -> bool {
        matches!(self, RawVolume::Text(s) if s.trim().is_empty())
    }
}

/// An un-validated record, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub reservoir_id: Option<String>,
    pub date: Option<String>,
    pub volume: Option<RawVolume>,
}

impl RawRecord {
    /// Build a record from one `Date,TAF` CSV row. The reservoir id comes from
    /// the caller since the exports carry one reservoir per file.
    pub fn from_csv_row(reservoir_id: &str, date: Option<String>, taf: Option<String>) -> Self {
        RawRecord {
            reservoir_id: Some(reservoir_id.to_string()),
            date,
            volume: taf.map(RawVolume::Text),
        }
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, MalformedRecordError> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(MalformedRecordError::MissingField(field)),
    }
}

/// Convert a raw record into a canonical [`Observation`].
///
/// Only true absence (missing, null or blank) counts as a missing volume;
/// a reading of `0` is a legitimate empty reservoir.
pub fn normalize(raw: RawRecord) -> Result<Observation, MalformedRecordError> {
    let reservoir_id = required(raw.reservoir_id, "reservoir_id")?;
    let date_str = required(raw.date, "date")?;
    let volume = match raw.volume {
        Some(v) if !v.is_blank() => v,
        _ => return Err(MalformedRecordError::MissingField("volume")),
    };

    let date = dates::parse_date(&date_str).ok_or(MalformedRecordError::InvalidDate(date_str))?;
    let volume = volume
        .to_finite()
        .ok_or_else(|| MalformedRecordError::InvalidVolume(volume.to_string()))?;

    Ok(Observation {
        reservoir_id,
        date,
        volume,
    })
}
