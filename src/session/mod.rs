//! Broker session management.
//!
//! [`SessionManager`] owns the connectivity state machine and the only
//! transport handle. Each [`SessionManager::step`] is one bounded attempt;
//! [`SessionManager::ensure_connected`] repeats steps until the session is
//! ready, pacing retries with fixed delays.

mod link;
mod mqtt;
mod transport;

pub use link::{HostLink, NetworkLink};
pub use mqtt::MqttTransport;
pub use transport::{InboundMessage, SessionParams, Transport, TransportError};

use crate::actuator::Actuator;
use crate::channel::TopicScheme;
use crate::command::CommandDispatcher;
use crate::config::{MqttConfig, SessionConfig};
use crate::error::{AgentError, Result};
use log::{debug, info, warn};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    NetworkJoining,
    NetworkJoined,
    SessionHandshaking,
    SessionReady,
}

/// Fixed delays used by the state machine. None of them back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Wait between network link polls while joining.
    pub join_poll: Duration,
    /// Wait after a failed resolve or handshake before the next attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on a single publish.
    pub write_timeout: Duration,
}

impl From<&SessionConfig> for SessionTiming {
    fn from(config: &SessionConfig) -> Self {
        Self {
            join_poll: config.join_poll(),
            reconnect_delay: config.reconnect_delay(),
            write_timeout: config.write_timeout(),
        }
    }
}

impl From<&MqttConfig> for SessionParams {
    fn from(config: &MqttConfig) -> Self {
        Self {
            host: config.broker_host.clone(),
            port: config.broker_port,
            client_id: config.client_id.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

pub struct SessionManager<T, L> {
    state: SessionState,
    transport: T,
    link: L,
    params: SessionParams,
    timing: SessionTiming,
    topics: TopicScheme,
    broker_addr: Option<IpAddr>,
}

impl<T: Transport, L: NetworkLink> SessionManager<T, L> {
    pub fn new(
        transport: T,
        link: L,
        params: SessionParams,
        timing: SessionTiming,
        topics: TopicScheme,
    ) -> Self {
        Self {
            state: SessionState::Disconnected,
            transport,
            link,
            params,
            timing,
            topics,
            broker_addr: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::SessionReady
    }

    /// Last address the broker host resolved to.
    pub fn broker_addr(&self) -> Option<IpAddr> {
        self.broker_addr
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Block until the session is ready.
    ///
    /// Returns immediately when already ready and the transport still
    /// reports the session open. Retries forever otherwise.
    pub async fn ensure_connected(&mut self) {
        if self.state == SessionState::SessionReady {
            if self.transport.is_connected() {
                return;
            }
            warn!("[Session] Transport reports the session closed");
            self.degrade();
        }

        while self.step().await != SessionState::SessionReady {}
    }

    /// Perform one bounded transition attempt and return the new state.
    pub async fn step(&mut self) -> SessionState {
        let next = match self.state {
            SessionState::Disconnected => {
                self.link.begin_join().await;
                SessionState::NetworkJoining
            }
            SessionState::NetworkJoining => {
                if self.link.is_joined().await {
                    info!("[Session] Network joined");
                    SessionState::NetworkJoined
                } else {
                    debug!("[Session] Network not joined yet");
                    tokio::time::sleep(self.timing.join_poll).await;
                    SessionState::NetworkJoining
                }
            }
            SessionState::NetworkJoined => match self.link.resolve(&self.params.host).await {
                Ok(ip) => {
                    info!("[Session] Broker {} resolved to {}", self.params.host, ip);
                    self.broker_addr = Some(ip);
                    SessionState::SessionHandshaking
                }
                Err(e) => {
                    warn!(
                        "[Session] Failed to resolve {}: {}, retrying in {:?}",
                        self.params.host, e, self.timing.reconnect_delay
                    );
                    tokio::time::sleep(self.timing.reconnect_delay).await;
                    SessionState::NetworkJoined
                }
            },
            SessionState::SessionHandshaking => {
                if !self.link.is_joined().await {
                    warn!("[Session] Network link lost, rejoining");
                    SessionState::Disconnected
                } else {
                    self.handshake().await
                }
            }
            SessionState::SessionReady => {
                if self.transport.is_connected() {
                    SessionState::SessionReady
                } else {
                    SessionState::SessionHandshaking
                }
            }
        };
        self.transition(next);
        next
    }

    async fn handshake(&mut self) -> SessionState {
        info!(
            "[Session] Connecting to {}:{} as {}",
            self.params.host, self.params.port, self.params.client_id
        );

        let command_topic = self.topics.command_topic();
        let result = match self.transport.connect(&self.params).await {
            Ok(()) => self.transport.subscribe(&command_topic).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("[Session] Connected, subscribed to {}", command_topic);
                self.announce().await;
                SessionState::SessionReady
            }
            Err(e) => {
                warn!(
                    "[Session] Connection failed: {}, retrying in {:?}",
                    e, self.timing.reconnect_delay
                );
                tokio::time::sleep(self.timing.reconnect_delay).await;
                SessionState::SessionHandshaking
            }
        }
    }

    /// Publish the connectivity self-test set. Failures are logged only.
    async fn announce(&mut self) {
        for announcement in self.topics.announcements() {
            let sent = tokio::time::timeout(
                self.timing.write_timeout,
                self.transport
                    .publish(&announcement.topic, announcement.payload.as_bytes()),
            )
            .await;
            match sent {
                Ok(Ok(())) => debug!("[Session] Announced on {}", announcement.topic),
                Ok(Err(e)) => warn!(
                    "[Session] Announcement on {} failed: {}",
                    announcement.topic, e
                ),
                Err(_) => warn!("[Session] Announcement on {} timed out", announcement.topic),
            }
        }
    }

    /// Service one transport tick and dispatch what it delivered.
    ///
    /// Messages are handled one at a time, in arrival order; a command hold
    /// delays every message behind it. Returns the number dispatched.
    pub async fn pump_inbound<A: Actuator>(&mut self, dispatcher: &mut CommandDispatcher<A>) -> usize {
        if self.state != SessionState::SessionReady {
            return 0;
        }

        match self.transport.tick().await {
            Ok(messages) => {
                let count = messages.len();
                for message in &messages {
                    dispatcher.handle(message).await;
                }
                count
            }
            Err(e) => {
                warn!("[Session] Session tick failed: {}", e);
                self.degrade();
                0
            }
        }
    }

    /// Send one message. Failures are returned, never retried, and mark the
    /// session for a fresh handshake on the next `ensure_connected`.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.state != SessionState::SessionReady {
            return Err(AgentError::NotReady(self.state));
        }

        match tokio::time::timeout(self.timing.write_timeout, self.transport.publish(topic, payload))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                self.degrade();
                Err(AgentError::PublishFailed {
                    topic: topic.to_string(),
                    source,
                })
            }
            Err(_) => {
                self.degrade();
                Err(AgentError::PublishTimeout(topic.to_string()))
            }
        }
    }

    fn degrade(&mut self) {
        if self.state == SessionState::SessionReady {
            self.transition(SessionState::SessionHandshaking);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if next != self.state {
            info!("[Session] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
impl<T, L> SessionManager<T, L> {
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub(crate) fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
