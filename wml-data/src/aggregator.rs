//! In-memory daily aggregation engine.
//!
//! State is `date -> reservoir -> [volume]`, kept in `BTreeMap`s so that a
//! flush walks dates ascending and, within a date, reservoirs ascending.
//! Nothing is ever evicted: memory grows with the number of observations
//! received over the life of the process.

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wml_core::{payload, topic, Observation};

/// Volumes received for each reservoir on a single date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyBucket {
    reservoirs: BTreeMap<String, Vec<f64>>,
}

impl DailyBucket {
    fn push(&mut self, reservoir_id: &str, volume: f64) {
        match self.reservoirs.get_mut(reservoir_id) {
            Some(volumes) => volumes.push(volume),
            None => {
                self.reservoirs.insert(reservoir_id.to_string(), vec![volume]);
            }
        }
    }

    /// Volumes for a reservoir in arrival order.
    pub fn volumes(&self, reservoir_id: &str) -> Option<&[f64]> {
        self.reservoirs.get(reservoir_id).map(Vec::as_slice)
    }
}

/// Per (date, reservoir) statistics derived at flush time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub date: NaiveDate,
    pub reservoir_id: String,
    pub observation_count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl SummaryRow {
    /// `None` for an empty slice; empty groups are never reported.
    fn from_volumes(date: NaiveDate, reservoir_id: &str, volumes: &[f64]) -> Option<Self> {
        let first = *volumes.first()?;
        let (min, max, sum) = volumes
            .iter()
            .fold((first, first, 0.0), |(min, max, sum), &v| {
                (min.min(v), max.max(v), sum + v)
            });
        // Rounding can push the mean a hair outside [min, max] for
        // near-identical volumes.
        let mean = (sum / volumes.len() as f64).clamp(min, max);
        Some(SummaryRow {
            date,
            reservoir_id: reservoir_id.to_string(),
            observation_count: volumes.len(),
            mean,
            min,
            max,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AggregatorState {
    /// Subscribed and accepting messages
    Running,
    /// Unsubscribed; the final flush has been taken
    Stopped,
}

/// What [`Aggregator::on_message`] did with a delivery.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MessageOutcome {
    Accumulated,
    /// Topic is not a reservoir feed
    IgnoredTopic,
    /// Payload could not be decoded or normalized
    Dropped,
    /// Delivery arrived after shutdown
    Stopped,
}

/// Owns all accumulated state. The message path is the only writer.
#[derive(Debug)]
pub struct Aggregator {
    buckets: BTreeMap<NaiveDate, DailyBucket>,
    state: AggregatorState,
    accepted: u64,
    dropped: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator {
            buckets: BTreeMap::new(),
            state: AggregatorState::Running,
            accepted: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Handle one bus delivery. Never fails: bad topics and bad payloads are
    /// logged with the raw payload and leave the state untouched.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> MessageOutcome {
        if self.state == AggregatorState::Stopped {
            debug!("Aggregator stopped, ignoring message on {}", topic);
            return MessageOutcome::Stopped;
        }
        let Some(topic_reservoir) = topic::reservoir_from_topic(topic) else {
            warn!("Ignoring message on unexpected topic {:?}", topic);
            return MessageOutcome::IgnoredTopic;
        };
        let observation = match payload::decode(payload) {
            Ok(observation) => observation,
            Err(e) => {
                self.dropped += 1;
                warn!(
                    "Invalid payload on {}, skipping ({}): {}",
                    topic,
                    e,
                    String::from_utf8_lossy(payload)
                );
                return MessageOutcome::Dropped;
            }
        };
        if observation.reservoir_id != topic_reservoir {
            warn!(
                "Payload reservoir {} does not match topic {}, using payload",
                observation.reservoir_id, topic
            );
        }
        debug!(
            "Received {} {} {}",
            observation.reservoir_id, observation.date, observation.volume
        );
        self.accumulate(observation);
        MessageOutcome::Accumulated
    }

    /// Append the observation's volume to its (date, reservoir) group.
    pub fn accumulate(&mut self, observation: Observation) {
        self.buckets
            .entry(observation.date)
            .or_default()
            .push(&observation.reservoir_id, observation.volume);
        self.accepted += 1;
    }

    /// Snapshot of every (date, reservoir) group, dates ascending then
    /// reservoirs ascending. Does not modify state.
    pub fn flush(&self) -> Vec<SummaryRow> {
        self.buckets
            .iter()
            .flat_map(|(date, bucket)| {
                bucket
                    .reservoirs
                    .iter()
                    .filter_map(move |(reservoir, volumes)| {
                        SummaryRow::from_volumes(*date, reservoir, volumes)
                    })
            })
            .collect()
    }

    /// Transition Running -> Stopped, returning the one final flush.
    /// Returns `None` if already stopped.
    pub fn stop(&mut self) -> Option<Vec<SummaryRow>> {
        if self.state == AggregatorState::Stopped {
            return None;
        }
        self.state = AggregatorState::Stopped;
        let rows = self.flush();
        info!(
            "Aggregator stopped: {} observations accepted, {} dropped, {} summary rows",
            self.accepted,
            self.dropped,
            rows.len()
        );
        Some(rows)
    }

    pub fn bucket(&self, date: &NaiveDate) -> Option<&DailyBucket> {
        self.buckets.get(date)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Payloads dropped as malformed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
