//! Stream a reservoir CSV export onto the bus.
//!
//! Every row becomes one message on `<reservoir_id>/WML`. There is no retry:
//! the first transport failure ends the stream, and the caller decides
//! whether to start over from the top of the file.

use crate::bus::{BusArgs, MessageSink, MqttSink, TransportError};
use futures::{stream, Stream, StreamExt};
use log::{info, warn};
use std::{path::Path, time::Duration};
use wml_core::{
    payload,
    source::ObservationSource,
    topic::feed_topic,
    MalformedRecordError, Observation,
};

/// Acknowledgement for one published observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishConfirmation {
    pub topic: String,
    pub packet_id: u16,
    pub observation: Observation,
}

/// Publish observations one at a time, yielding a confirmation per message.
///
/// Malformed rows are logged and skipped. After a send fails the stream
/// yields that error and then ends. `rate_limit` is slept after each send
/// and is best effort.
pub fn publish<'a, S, I>(
    sink: &'a mut S,
    observations: I,
    rate_limit: Option<Duration>,
) -> impl Stream<Item = Result<PublishConfirmation, TransportError>> + 'a
where
    S: MessageSink + 'a,
    I: IntoIterator<Item = Result<Observation, MalformedRecordError>>,
    I::IntoIter: 'a,
{
    stream::unfold(
        Some((sink, observations.into_iter())),
        move |state| async move {
            let (sink, mut observations) = state?;
            loop {
                let observation = match observations.next()? {
                    Ok(observation) => observation,
                    Err(e) => {
                        warn!("Skipping malformed row: {}", e);
                        continue;
                    }
                };
                let topic = feed_topic(&observation.reservoir_id);
                let bytes = match payload::encode(&observation) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Failed to encode {:?}, skipping: {}", observation, e);
                        continue;
                    }
                };
                return match sink.send(&topic, bytes).await {
                    Ok(packet_id) => {
                        if let Some(delay) = rate_limit {
                            tokio::time::sleep(delay).await;
                        }
                        let confirmation = PublishConfirmation {
                            topic,
                            packet_id,
                            observation,
                        };
                        Some((Ok(confirmation), Some((sink, observations))))
                    }
                    Err(e) => Some((Err(e), None)),
                };
            }
        },
    )
}

/// Publish every row of `file` for `reservoir`, returning how many messages
/// were acknowledged.
pub async fn run_publish(
    bus: &BusArgs,
    file: &Path,
    reservoir: &str,
    delay: Option<Duration>,
) -> anyhow::Result<usize> {
    let source = ObservationSource::open(file, reservoir)?;
    let mut sink = MqttSink::connect(bus, "publisher").await?;

    let mut published = 0usize;
    {
        let confirmations = publish(&mut sink, source, delay);
        futures::pin_mut!(confirmations);
        while let Some(result) = confirmations.next().await {
            let confirmation = result?;
            info!(
                "Published to {}: {} {} {}",
                confirmation.topic,
                confirmation.observation.reservoir_id,
                confirmation.observation.date,
                confirmation.observation.volume
            );
            published += 1;
        }
    }

    sink.disconnect().await;
    info!(
        "Publish complete. {} observations from {} sent to {}",
        published,
        file.display(),
        feed_topic(reservoir)
    );
    Ok(published)
}
