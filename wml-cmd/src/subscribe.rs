//! Long-running subscriber that aggregates every reservoir feed.
//!
//! A single task owns both the MQTT event loop and the [`Aggregator`], so
//! message delivery and report flushes never overlap. On shutdown the task
//! leaves the delivery loop, unsubscribes, disconnects, and only then takes
//! the final flush.

use crate::bus::{self, BusArgs, TransportError};
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::{future::Future, path::Path, time::Duration};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use wml_core::topic::FEED_WILDCARD;
use wml_data::{
    report::{self, ReportOutcome},
    Aggregator, MessageOutcome,
};

/// Pause before polling again after a connection error; the client library
/// reconnects on the next poll.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the broker to acknowledge the unsubscribe.
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

async fn subscribe(client: &AsyncClient) -> Result<(), TransportError> {
    client
        .subscribe(FEED_WILDCARD, QoS::AtLeastOnce)
        .await
        .map_err(|source| TransportError::Subscribe {
            filter: FEED_WILDCARD.to_string(),
            source,
        })
}

/// Route one event-loop event. Publishes go to the aggregator; a fresh
/// CONNACK means the library reconnected and the subscription must be renewed.
pub async fn handle_event(
    client: &AsyncClient,
    aggregator: &mut Aggregator,
    event: Event,
) -> Result<Option<MessageOutcome>, TransportError> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            Ok(Some(aggregator.on_message(&publish.topic, &publish.payload)))
        }
        Event::Incoming(Packet::ConnAck(_)) => {
            info!("Reconnected to broker, subscribing to {}", FEED_WILDCARD);
            subscribe(client).await?;
            Ok(None)
        }
        Event::Incoming(Packet::SubAck(ack)) => {
            debug!("Subscription acknowledged: {:?}", ack.return_codes);
            Ok(None)
        }
        _ => Ok(None),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn unsubscribe(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.unsubscribe(FEED_WILDCARD).await {
        warn!("Failed to request unsubscribe: {}", e);
        return;
    }
    let acknowledged = tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::UnsubAck(_))) => return,
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("Discarding message on {} received during shutdown", publish.topic)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Connection error while unsubscribing: {}", e);
                    return;
                }
            }
        }
    })
    .await;
    if acknowledged.is_err() {
        warn!("Timed out waiting for unsubscribe acknowledgement");
    }
}

/// Run until `shutdown` resolves, then write one report pair per date.
///
/// Fails only if the initial connection cannot be made. With
/// `report_interval` set, reports are also rewritten periodically from a
/// snapshot of the state so far.
pub async fn run_subscribe(
    bus: &BusArgs,
    outdir: &Path,
    report_interval: Option<Duration>,
    shutdown: impl Future<Output = ()>,
) -> Result<Vec<ReportOutcome>, TransportError> {
    let (client, mut eventloop) = bus::connect(bus, "subscriber").await?;
    info!("Subscribing to {}", FEED_WILDCARD);
    subscribe(&client).await?;

    let mut aggregator = Aggregator::new();
    let mut ticker = report_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Signal received, writing reports and exiting.");
                break;
            }
            _ = tick(&mut ticker) => {
                let rows = aggregator.flush();
                info!("Periodic report: {} rows", rows.len());
                // Blocking file writes on this task; delivery pauses until they finish.
                report::write_all(&rows, outdir);
            }
            polled = eventloop.poll() => match polled {
                Ok(event) => {
                    if let Err(e) = handle_event(&client, &mut aggregator, event).await {
                        error!("{}", e);
                    }
                }
                Err(e) => {
                    warn!("Connection error, retrying: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
        }
    }

    unsubscribe(&client, &mut eventloop).await;
    bus::disconnect(&client, &mut eventloop).await;

    let rows = aggregator.stop().unwrap_or_default();
    Ok(report::write_all(&rows, outdir))
}

#[cfg(test)]
mod test {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, MqttOptions, Publish};
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::oneshot,
        task::JoinHandle,
    };

    fn offline_client() -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("wml-test", "localhost", 1883), 10)
    }

    fn delivery(topic: &str, payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            topic,
            QoS::AtLeastOnce,
            payload.as_bytes().to_vec(),
        )))
    }

    #[tokio::test]
    async fn deliveries_reach_aggregator() {
        let (client, _eventloop) = offline_client();
        let mut aggregator = Aggregator::new();
        for volume in ["100.0", "300.0"] {
            let payload = format!(
                r#"{{"reservoir_id":"SHASTA","date":"2024-09-29","taf":{}}}"#,
                volume
            );
            let outcome = handle_event(&client, &mut aggregator, delivery("SHASTA/WML", &payload))
                .await
                .unwrap();
            assert_eq!(outcome, Some(MessageOutcome::Accumulated));
        }
        let rows = aggregator.flush();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].observation_count, 2);
        assert_eq!(rows[0].mean, 200.0);
        assert_eq!(rows[0].min, 100.0);
        assert_eq!(rows[0].max, 300.0);
    }

    #[tokio::test]
    async fn bad_deliveries_do_not_escape() {
        let (client, _eventloop) = offline_client();
        let mut aggregator = Aggregator::new();
        let missing_date = delivery("SHASTA/WML", r#"{"reservoir_id":"SHASTA","taf":1.0}"#);
        let outcome = handle_event(&client, &mut aggregator, missing_date).await.unwrap();
        assert_eq!(outcome, Some(MessageOutcome::Dropped));
        let wrong_topic = delivery("SHASTA/status", "{}");
        let outcome = handle_event(&client, &mut aggregator, wrong_topic).await.unwrap();
        assert_eq!(outcome, Some(MessageOutcome::IgnoredTopic));
        assert!(aggregator.is_empty());
    }

    #[tokio::test]
    async fn reconnect_renews_subscription() {
        let (client, _eventloop) = offline_client();
        let mut aggregator = Aggregator::new();
        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        let outcome = handle_event(&client, &mut aggregator, connack).await.unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn unreachable_broker_is_fatal() {
        let bus = BusArgs {
            broker: "127.0.0.1".to_string(),
            port: 1,
            keep_alive: 60,
            client_id: Some("wml-test".to_string()),
        };
        let dir = tempfile::tempdir().unwrap();
        let result = run_subscribe(&bus, dir.path(), None, std::future::pending()).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    const SHASTA_PAYLOAD: &str = r#"{"reservoir_id":"SHASTA","date":"2024-09-29","taf":2720.0}"#;

    /// What the scripted broker saw from the subscriber.
    #[derive(Debug, Default)]
    struct BrokerLog {
        subscribed: bool,
        /// Whether the JSON report already existed when UNSUBSCRIBE arrived
        report_at_unsubscribe: Option<bool>,
        disconnected: bool,
    }

    async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = stream.read_u8().await.ok()?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.ok()?;
        Some((header, body))
    }

    /// QoS 1 PUBLISH with packet id 1.
    fn publish_frame(topic: &str, payload: &str) -> Vec<u8> {
        let remaining = 2 + topic.len() + 2 + payload.len();
        assert!(remaining < 128);
        let mut frame = vec![0x32, remaining as u8, 0, topic.len() as u8];
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(&[0, 1]);
        frame.extend_from_slice(payload.as_bytes());
        frame
    }

    /// Accepts one client: CONNACK, SUBACK then one PUBLISH, UNSUBACK, and
    /// stops at DISCONNECT. `acked` fires once the client acknowledged the
    /// PUBLISH.
    fn scripted_broker(
        listener: TcpListener,
        report: PathBuf,
        acked: oneshot::Sender<()>,
    ) -> JoinHandle<BrokerLog> {
        tokio::spawn(async move {
            let mut log = BrokerLog::default();
            let mut acked = Some(acked);
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Some((header, body)) = read_packet(&mut stream).await {
                match header >> 4 {
                    1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                    8 => {
                        log.subscribed = true;
                        stream.write_all(&[0x90, 0x03, body[0], body[1], 0x01]).await.unwrap();
                        stream
                            .write_all(&publish_frame("SHASTA/WML", SHASTA_PAYLOAD))
                            .await
                            .unwrap();
                    }
                    4 => {
                        if let Some(tx) = acked.take() {
                            let _ = tx.send(());
                        }
                    }
                    10 => {
                        log.report_at_unsubscribe = Some(report.exists());
                        stream.write_all(&[0xb0, 0x02, body[0], body[1]]).await.unwrap();
                    }
                    12 => stream.write_all(&[0xd0, 0x00]).await.unwrap(),
                    14 => {
                        log.disconnected = true;
                        break;
                    }
                    _ => {}
                }
            }
            log
        })
    }

    async fn local_bus() -> (TcpListener, BusArgs) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let bus = BusArgs {
            broker: "127.0.0.1".to_string(),
            port,
            keep_alive: 60,
            client_id: Some("wml-test".to_string()),
        };
        (listener, bus)
    }

    #[tokio::test]
    async fn shutdown_unsubscribes_then_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 9, 29).unwrap();
        let json = report::json_path(dir.path(), &date);
        let csv = report::csv_path(dir.path(), &date);

        let (listener, bus) = local_bus().await;
        let (acked_tx, acked_rx) = oneshot::channel();
        let broker = scripted_broker(listener, json.clone(), acked_tx);
        let shutdown = async {
            let _ = acked_rx.await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        };

        let outcomes = run_subscribe(&bus, dir.path(), None, shutdown).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        assert!(json.exists());
        assert!(csv.exists());

        let rows: Vec<wml_data::SummaryRow> =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reservoir_id, "SHASTA");
        assert_eq!(rows[0].observation_count, 1);
        assert_eq!(rows[0].mean, 2720.0);

        let log = broker.await.unwrap();
        assert!(log.subscribed);
        assert_eq!(log.report_at_unsubscribe, Some(false));
        assert!(log.disconnected);
    }

    #[tokio::test]
    async fn report_interval_writes_before_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 9, 29).unwrap();
        let json = report::json_path(dir.path(), &date);
        let csv = report::csv_path(dir.path(), &date);

        let (listener, bus) = local_bus().await;
        let (acked_tx, acked_rx) = oneshot::channel();
        let broker = scripted_broker(listener, json.clone(), acked_tx);
        let seen_while_running = Arc::new(AtomicBool::new(false));
        let shutdown = {
            let seen = Arc::clone(&seen_while_running);
            let (json, csv) = (json.clone(), csv.clone());
            async move {
                let _ = acked_rx.await;
                for _ in 0..100 {
                    if json.exists() && csv.exists() {
                        seen.store(true, Ordering::SeqCst);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        };

        let outcomes = run_subscribe(&bus, dir.path(), Some(Duration::from_millis(100)), shutdown)
            .await
            .unwrap();
        assert!(seen_while_running.load(Ordering::SeqCst));
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());

        let log = broker.await.unwrap();
        assert!(log.disconnected);
    }
}
