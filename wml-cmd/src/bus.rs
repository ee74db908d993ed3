//! MQTT connection settings and the publish-side transport seam.

use clap::Args;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use thiserror::Error;

/// Bounded request queue between the client handle and its event loop.
const CHANNEL_CAPACITY: usize = 10;

/// Upper bound on waiting for the broker to confirm a disconnect.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    pub broker: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// Keep-alive interval in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(5..))]
    pub keep_alive: u64,

    /// Client id (defaults to wml-<role>-<pid>)
    #[arg(long)]
    pub client_id: Option<String>,
}

impl BusArgs {
    pub fn client_id(&self, role: &str) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("wml-{}-{}", role, std::process::id()))
    }

    pub fn mqtt_options(&self, role: &str) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id(role), self.broker.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive));
        options.set_clean_session(true);
        options
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    /// Broker unreachable or refused the session at startup
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: ConnectionError,
    },

    /// Publish could not be handed to the client
    #[error("failed to publish on {topic}: {source}")]
    Send {
        topic: String,
        #[source]
        source: ClientError,
    },

    /// Connection dropped while sending or receiving
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("failed to subscribe to {filter}: {source}")]
    Subscribe {
        filter: String,
        #[source]
        source: ClientError,
    },
}

/// Open a session and wait for the broker's CONNACK.
pub async fn connect(bus: &BusArgs, role: &str) -> Result<(AsyncClient, EventLoop), TransportError> {
    let (client, mut eventloop) = AsyncClient::new(bus.mqtt_options(role), CHANNEL_CAPACITY);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("Connected to broker {}:{} ({:?})", bus.broker, bus.port, ack.code);
                return Ok((client, eventloop));
            }
            Ok(event) => debug!("Pre-connect event: {:?}", event),
            Err(source) => {
                return Err(TransportError::Connect {
                    host: bus.broker.clone(),
                    port: bus.port,
                    source,
                })
            }
        }
    }
}

/// Request a disconnect and drive the event loop until it goes out.
pub async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.disconnect().await {
        warn!("Failed to request disconnect: {}", e);
        return;
    }
    let sent = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Event loop closed during disconnect: {}", e);
                    return;
                }
            }
        }
    })
    .await;
    if sent.is_err() {
        warn!("Timed out waiting for disconnect to complete");
    }
}

/// Something that can deliver a payload to a topic, one at a time.
#[allow(async_fn_in_trait)]
pub trait MessageSink {
    /// Send one payload, resolving to the packet id once the bus acknowledged it.
    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<u16, TransportError>;
}

/// Publishes over MQTT with QoS 1, waiting for each PUBACK.
pub struct MqttSink {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttSink {
    pub async fn connect(bus: &BusArgs, role: &str) -> Result<Self, TransportError> {
        let (client, eventloop) = connect(bus, role).await?;
        Ok(MqttSink { client, eventloop })
    }

    pub async fn disconnect(mut self) {
        disconnect(&self.client, &mut self.eventloop).await;
    }
}

impl MessageSink for MqttSink {
    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<u16, TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|source| TransportError::Send {
                topic: topic.to_string(),
                source,
            })?;
        let mut packet_id = None;
        loop {
            match self.eventloop.poll().await? {
                Event::Outgoing(Outgoing::Publish(pkid)) => packet_id = Some(pkid),
                Event::Incoming(Packet::PubAck(ack)) if Some(ack.pkid) == packet_id => {
                    return Ok(ack.pkid)
                }
                _ => {}
            }
        }
    }
}
