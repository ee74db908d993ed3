//! JSON wire format for bus messages.
//!
//! ```text
//! {"reservoir_id": "SHASTA", "date": "2024-09-29", "taf": 2720.0}
//! ```
//!
//! The volume travels as `taf` for compatibility with existing feeds.

use crate::{
    dates,
    error::MalformedRecordError,
    observation::{normalize, Observation, RawRecord, RawVolume},
};
use serde::{Deserialize, Serialize};

/// Inbound payload. Every field is optional so that a missing field is
/// reported as such by the normalizer instead of as a serde error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WirePayload {
    #[serde(default)]
    pub reservoir_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub taf: Option<RawVolume>,
}

impl From<WirePayload> for RawRecord {
    fn from(value: WirePayload) -> Self {
        RawRecord {
            reservoir_id: value.reservoir_id,
            date: value.date,
            volume: value.taf,
        }
    }
}

/// Outbound payload, borrowed from an [`Observation`].
#[derive(Debug, Serialize)]
pub struct OutboundPayload<'a> {
    pub reservoir_id: &'a str,
    pub date: String,
    pub taf: f64,
}

impl<'a> From<&'a Observation> for OutboundPayload<'a> {
    fn from(value: &'a Observation) -> Self {
        OutboundPayload {
            reservoir_id: &value.reservoir_id,
            date: dates::format_date(&value.date),
            taf: value.volume,
        }
    }
}

/// Serialize an observation to its JSON payload.
pub fn encode(observation: &Observation) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&OutboundPayload::from(observation))
}

/// Deserialize and normalize a JSON payload.
pub fn decode(bytes: &[u8]) -> Result<Observation, MalformedRecordError> {
    let payload: WirePayload = serde_json::from_slice(bytes)?;
    normalize(payload.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn encodes_wire_field_names() {
        let observation = Observation {
            reservoir_id: "SHASTA".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 9, 29).unwrap(),
            volume: 2720.0,
        };
        let bytes = encode(&observation).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"reservoir_id": "SHASTA", "date": "2024-09-29", "taf": 2720.0})
        );
        assert_eq!(decode(&bytes).unwrap(), observation);
    }

    #[test]
    fn decodes_us_date_and_string_volume() {
        let observation =
            decode(br#"{"reservoir_id":"ORO","date":"10/01/2024","taf":"1815.5"}"#).unwrap();
        assert_eq!(observation.date, NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert_eq!(observation.volume, 1815.5);
    }

    #[test]
    fn missing_or_null_taf_is_missing() {
        let missing = decode(br#"{"reservoir_id":"ORO","date":"2024-10-01"}"#);
        assert!(matches!(missing, Err(MalformedRecordError::MissingField("volume"))));
        let null = decode(br#"{"reservoir_id":"ORO","date":"2024-10-01","taf":null}"#);
        assert!(matches!(null, Err(MalformedRecordError::MissingField("volume"))));
    }

    #[test]
    fn garbage_is_a_payload_error() {
        assert!(matches!(decode(b"not json"), Err(MalformedRecordError::Payload(_))));
        assert!(matches!(
            decode(br#"{"reservoir_id":"ORO","date":"2024-10-01","taf":true}"#),
            Err(MalformedRecordError::Payload(_))
        ));
        assert!(matches!(decode(b"[1,2,3]"), Err(MalformedRecordError::Payload(_))));
    }
}
