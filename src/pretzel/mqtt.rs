// Pretzel - Battery-powered weather sensor node publishing over MQTT
//
// Copyright 2022-2023 The pretzel authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::time::Duration;
use tokio::time::{self, Instant};

/// Port the broker listens on.
pub const BROKER_PORT: u16 = 7001;

/// Topic the node publishes one reading to per wake cycle.
pub const DATA_TOPIC: &str = "awtrixnode/weather/data";

/// Pattern covering the node's whole topic hierarchy, control topic included.
pub const SUBSCRIBE_PATTERN: &str = "awtrixnode/weather/#";

/// Final topic segment carrying configuration updates.
pub const CONTROL_SEGMENT: &str = "newData";

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const CLIENT_QUEUE_CAPACITY: usize = 16;

/// Final segment of a topic path, used to dispatch inbound messages.
pub fn final_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Potential kinds of errors that can be encountered talking to the broker
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum TransportErrorKind {
    Connect,
    Subscribe,
    Publish,
}

/// Error connecting to the broker or exchanging messages with it
#[derive(Debug)]
pub enum TransportError {
    KindMsg(TransportErrorKind, &'static str),
    KindMsgCause(TransportErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::KindMsg(kind, _) => *kind,
            TransportError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::KindMsg(_, msg) => msg.fmt(f),
            TransportError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Session with the broker, as seen by the wake cycle: connect once, then
/// subscribe, publish, and poll for inbound messages.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Establish a session with the broker under the given identity.
    async fn connect(&mut self, identity: &str) -> Result<(), TransportError>;

    /// Subscribe to a topic pattern.
    async fn subscribe(&mut self, pattern: &str) -> Result<(), TransportError>;

    /// Publish a payload to a topic.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Service the connection once, returning an inbound message if one
    /// arrived. Returns quickly either way so the caller stays in control of
    /// its cycle.
    async fn poll_once(&mut self) -> Option<InboundMessage>;
}

/// MQTT implementation of [`Transport`] over `rumqttc`.
pub struct MqttTransport {
    server: String,
    credentials: Option<(String, String)>,
    session: Option<(AsyncClient, EventLoop)>,
}

impl MqttTransport {
    pub fn new(server: String, credentials: Option<(String, String)>) -> Self {
        MqttTransport {
            server,
            credentials,
            session: None,
        }
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self, identity: &str) -> Result<(), TransportError> {
        let mut options = MqttOptions::new(identity, &self.server, BROKER_PORT);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_QUEUE_CAPACITY);

        // Drive the event loop until the broker acknowledges the session.
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::KindMsg(
                    TransportErrorKind::Connect,
                    "timed out waiting for broker acknowledgement",
                ));
            }

            match time::timeout(remaining, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    return Err(TransportError::KindMsgCause(
                        TransportErrorKind::Connect,
                        "connection to broker failed",
                        Box::new(e),
                    ));
                }
                Err(_) => {
                    return Err(TransportError::KindMsg(
                        TransportErrorKind::Connect,
                        "timed out waiting for broker acknowledgement",
                    ));
                }
            }
        }

        self.session = Some((client, eventloop));
        Ok(())
    }

    async fn subscribe(&mut self, pattern: &str) -> Result<(), TransportError> {
        let (client, _) = self.session.as_ref().ok_or(TransportError::KindMsg(
            TransportErrorKind::Subscribe,
            "not connected to broker",
        ))?;

        client.subscribe(pattern, QoS::AtLeastOnce).await.map_err(|e| {
            TransportError::KindMsgCause(TransportErrorKind::Subscribe, "unable to subscribe", Box::new(e))
        })
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let (client, _) = self.session.as_ref().ok_or(TransportError::KindMsg(
            TransportErrorKind::Publish,
            "not connected to broker",
        ))?;

        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| {
                TransportError::KindMsgCause(TransportErrorKind::Publish, "unable to publish", Box::new(e))
            })
    }

    async fn poll_once(&mut self) -> Option<InboundMessage> {
        let (_, eventloop) = match self.session.as_mut() {
            Some(session) => session,
            None => {
                // nothing to service, don't let the caller spin
                time::sleep(POLL_TIMEOUT).await;
                return None;
            }
        };

        match time::timeout(POLL_TIMEOUT, eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Some(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                // the event loop reconnects on the next poll; slow down so a
                // dead broker doesn't turn the settle window into a busy loop
                tracing::warn!(message = "error servicing broker connection", error = %e);
                time::sleep(POLL_TIMEOUT).await;
                None
            }
            Err(_) => None,
        }
    }
}
