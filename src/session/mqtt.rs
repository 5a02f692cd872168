//! MQTT over TLS transport built on rumqttc.

use super::transport::{InboundMessage, SessionParams, Transport, TransportError};
use crate::config::{MqttConfig, SessionConfig};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport as Wire,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 32;

struct Connection {
    client: AsyncClient,
    event_loop: EventLoop,
}

/// MQTT client session authenticated against a preloaded CA bundle.
///
/// rumqttc only writes to the socket while its event loop is polled, so
/// `publish` and `subscribe` drive the loop until the packet has gone out.
/// Anything delivered meanwhile is queued for the next `tick`.
pub struct MqttTransport {
    ca: Vec<u8>,
    keep_alive: Duration,
    connect_timeout: Duration,
    tick: Duration,
    connection: Option<Connection>,
    connected: bool,
    pending: VecDeque<InboundMessage>,
}

impl MqttTransport {
    /// Create a transport trusting the given PEM-encoded certificate authorities.
    pub fn new(ca: Vec<u8>, keep_alive: Duration, connect_timeout: Duration, tick: Duration) -> Self {
        Self {
            ca,
            keep_alive,
            connect_timeout,
            tick,
            connection: None,
            connected: false,
            pending: VecDeque::new(),
        }
    }

    /// Create a transport from configuration, loading the trust bundle from disk.
    pub fn from_config(mqtt: &MqttConfig, session: &SessionConfig) -> Result<Self> {
        let ca = std::fs::read(&mqtt.ca_bundle).map_err(|source| AgentError::TrustBundle {
            path: mqtt.ca_bundle.clone(),
            source,
        })?;
        info!(
            "Loaded trust bundle {} ({} bytes)",
            mqtt.ca_bundle.display(),
            ca.len()
        );
        Ok(Self::new(
            ca,
            mqtt.keep_alive(),
            session.connect_timeout(),
            session.tick(),
        ))
    }

    fn options(&self, params: &SessionParams) -> MqttOptions {
        let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
        options.set_keep_alive(self.keep_alive);

        if let (Some(username), Some(password)) = (&params.username, &params.password) {
            options.set_credentials(username, password);
        }

        options.set_transport(Wire::tls_with_config(TlsConfiguration::Simple {
            ca: self.ca.clone(),
            alpn: None,
            client_auth: None,
        }));
        options
    }

    /// Record a delivered publish; everything else is protocol chatter.
    fn absorb(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                debug!(
                    "Received MQTT message on {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                self.pending
                    .push_back(InboundMessage::new(publish.topic, publish.payload.to_vec()));
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("[Session] Broker sent DISCONNECT");
                self.connected = false;
            }
            Event::Outgoing(Outgoing::PingReq) => debug!("Keep-alive ping sent"),
            _ => {}
        }
    }

    /// Hand over everything delivered so far, oldest first.
    fn take_pending(&mut self) -> Vec<InboundMessage> {
        self.pending.drain(..).collect()
    }

    /// Poll the event loop until `done` matches an event.
    async fn drive_until(
        &mut self,
        what: &'static str,
        done: impl Fn(&Event) -> bool,
    ) -> std::result::Result<(), TransportError> {
        loop {
            let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
            match connection.event_loop.poll().await {
                Ok(event) => {
                    let matched = done(&event);
                    self.absorb(event);
                    if matched {
                        return Ok(());
                    }
                    if !self.connected {
                        return Err(TransportError::Refused(format!(
                            "session closed while waiting for {what}"
                        )));
                    }
                }
                Err(e) => {
                    self.connected = false;
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self, params: &SessionParams) -> std::result::Result<(), TransportError> {
        if let Some(old) = self.connection.take() {
            let _ = old.client.try_disconnect();
        }
        self.connected = false;
        self.pending.clear();

        let (client, mut event_loop) = AsyncClient::new(self.options(params), REQUEST_CAPACITY);

        let ack = timeout(self.connect_timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::from(e)),
                }
            }
        })
        .await
        .map_err(|_| TransportError::Timeout("CONNACK"))??;

        if ack.code != ConnectReturnCode::Success {
            return Err(TransportError::Refused(format!("{:?}", ack.code)));
        }

        self.connection = Some(Connection { client, event_loop });
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> std::result::Result<(), TransportError> {
        let connection = self.connection.as_ref().ok_or(TransportError::NotConnected)?;
        connection.client.subscribe(topic, QoS::AtMostOnce).await?;
        self.drive_until("SUBACK", |event| {
            matches!(event, Event::Incoming(Packet::SubAck(_)))
        })
        .await
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> std::result::Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let connection = self.connection.as_ref().ok_or(TransportError::NotConnected)?;
        connection
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        self.drive_until("PUBLISH write", |event| {
            matches!(event, Event::Outgoing(Outgoing::Publish(_)))
        })
        .await
    }

    async fn tick(&mut self) -> std::result::Result<Vec<InboundMessage>, TransportError> {
        let deadline = Instant::now() + self.tick;
        loop {
            let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
            match timeout_at(deadline, connection.event_loop.poll()).await {
                // Tick window elapsed with nothing more to read
                Err(_) => break,
                Ok(Ok(event)) => {
                    self.absorb(event);
                    if !self.connected {
                        return Err(TransportError::Refused("broker closed the session".into()));
                    }
                }
                Ok(Err(e)) => {
                    self.connected = false;
                    return Err(e.into());
                }
            }
        }
        Ok(self.take_pending())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
