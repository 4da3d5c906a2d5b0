//! MQTT bus session and event marshaling
//!
//! The rumqttc event loop runs in its own task and marshals every
//! transport event onto one mpsc channel. The reactor consumes that
//! channel from a single task, so all store mutations happen in one
//! control context regardless of where the transport does its I/O.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::BrokerConfig;

/// Delay before polling again after a transport error; rumqttc
/// reconnects on the next poll
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus client error: {0}")]
    Client(String),
}

/// Transport events as seen by the reactor's control loop
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Session established (initial connect or reconnect)
    Connected,
    /// Session lost after having been established
    Disconnected,
    /// Connect attempt failed before any session was established
    ConnectFailed(String),
    /// Inbound publish
    Message { topic: String, payload: Vec<u8> },
    /// Shutdown request (interrupt signal)
    Shutdown,
}

/// The bus operations the reactor performs. Object-safe so tests can
/// substitute a recording fake.
#[async_trait]
pub trait BusSession: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), BusError>;
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError>;
    async fn disconnect(&self) -> Result<(), BusError>;
}

/// Live MQTT session over rumqttc
pub struct MqttSession {
    client: AsyncClient,
}

#[async_trait]
impl BusSession for MqttSession {
    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }
}

/// Open the broker session and spawn its event loop. Transport events
/// arrive on `events`; the session handle is used for outbound calls.
pub fn open_session(
    broker: &BrokerConfig,
    client_id: &str,
    events: mpsc::Sender<BusEvent>,
) -> MqttSession {
    let mut options = MqttOptions::new(client_id, &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));

    let (client, eventloop) = AsyncClient::new(options, 64);
    tokio::spawn(run_event_loop(eventloop, events));

    MqttSession { client }
}

async fn run_event_loop(mut eventloop: EventLoop, events: mpsc::Sender<BusEvent>) {
    let mut connected = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                connected = true;
                if events.send(BusEvent::Connected).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                trace!(topic = %publish.topic, len = publish.payload.len(), "inbound publish");
                let message = BusEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if events.send(message).await.is_err() {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                // Session closed by the reactor
                debug!("bus event loop finished");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let event = if connected {
                    connected = false;
                    BusEvent::Disconnected
                } else {
                    BusEvent::ConnectFailed(e.to_string())
                };
                if events.send(event).await.is_err() {
                    break;
                }
                // Next poll reconnects
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
