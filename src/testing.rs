//! In-memory collaborators for unit tests.
//!
//! Everything records what it was asked to do and when (on tokio's clock,
//! so paused-time tests see exact virtual instants).

use crate::actuator::{Actuator, ActuatorState};
use crate::sensors::SampledSensor;
use crate::session::{InboundMessage, NetworkLink, SessionParams, Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::Instant;

pub fn params() -> SessionParams {
    SessionParams {
        host: "broker.example".to_string(),
        port: 8883,
        client_id: "ESP32Client".to_string(),
        username: Some("user".to_string()),
        password: Some("pass".to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub at: Instant,
}

#[derive(Default)]
pub struct FakeTransport {
    pub connected: bool,
    pub connect_calls: usize,
    pub connected_with: Option<SessionParams>,
    pub subscriptions: Vec<String>,
    pub published: Vec<Published>,
    pub publish_attempts: usize,
    pub ticks: usize,

    pub connect_failures: usize,
    pub subscribe_failures: usize,
    pub fail_publishes: usize,
    /// Fail the publish attempt with this zero-based index.
    pub fail_publish_at: Option<usize>,
    pub publish_delay: Duration,
    pub fail_ticks: usize,
    inbound: VecDeque<Vec<InboundMessage>>,
}

impl FakeTransport {
    pub fn failing_connects(mut self, n: usize) -> Self {
        self.connect_failures = n;
        self
    }

    pub fn failing_subscribes(mut self, n: usize) -> Self {
        self.subscribe_failures = n;
        self
    }

    /// Queue one batch of messages; each tick delivers the oldest batch.
    pub fn queue_tick(&mut self, messages: Vec<InboundMessage>) {
        self.inbound.push_back(messages);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self, params: &SessionParams) -> Result<(), TransportError> {
        self.connect_calls += 1;
        self.connected = false;
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(TransportError::Refused("NotAuthorized".to_string()));
        }
        self.connected = true;
        self.connected_with = Some(params.clone());
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if self.subscribe_failures > 0 {
            self.subscribe_failures -= 1;
            return Err(TransportError::Timeout("SUBACK"));
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let attempt = self.publish_attempts;
        self.publish_attempts += 1;

        if !self.publish_delay.is_zero() {
            tokio::time::sleep(self.publish_delay).await;
        }
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.fail_publishes > 0 {
            self.fail_publishes -= 1;
            return Err(TransportError::NotConnected);
        }
        if self.fail_publish_at == Some(attempt) {
            return Err(TransportError::NotConnected);
        }

        self.published.push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn tick(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        self.ticks += 1;
        if self.fail_ticks > 0 {
            self.fail_ticks -= 1;
            self.connected = false;
            return Err(TransportError::Timeout("PINGRESP"));
        }
        Ok(self.inbound.pop_front().unwrap_or_default())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub struct FakeLink {
    pub up: bool,
    /// Number of polls after a join request that still report "not joined".
    pub joined_after: usize,
    pub polls: usize,
    pub join_calls: usize,
    pub resolve_calls: usize,
    pub resolve_failures: usize,
}

impl FakeLink {
    pub fn joined_after(polls: usize) -> Self {
        Self {
            up: true,
            joined_after: polls,
            polls: 0,
            join_calls: 0,
            resolve_calls: 0,
            resolve_failures: 0,
        }
    }

    pub fn failing_resolves(mut self, n: usize) -> Self {
        self.resolve_failures = n;
        self
    }
}

#[async_trait]
impl NetworkLink for FakeLink {
    async fn begin_join(&mut self) {
        self.join_calls += 1;
        self.up = true;
        self.polls = 0;
    }

    async fn is_joined(&mut self) -> bool {
        self.polls += 1;
        self.up && self.polls > self.joined_after
    }

    async fn resolve(&mut self, _host: &str) -> io::Result<IpAddr> {
        self.resolve_calls += 1;
        if self.resolve_failures > 0 {
            self.resolve_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such host"));
        }
        Ok(IpAddr::from([10, 0, 0, 2]))
    }
}

/// Sensor replaying a fixed script, then a fallback value forever.
pub struct ScriptedSensor {
    script: VecDeque<Option<f64>>,
    fallback: Option<f64>,
    range: RangeInclusive<f64>,
    read_times: Vec<Instant>,
}

impl ScriptedSensor {
    pub fn new(script: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: None,
            range: f64::MIN..=f64::MAX,
            read_times: Vec::new(),
        }
    }

    pub fn repeating(value: Option<f64>) -> Self {
        let mut sensor = Self::new(std::iter::empty());
        sensor.fallback = value;
        sensor
    }

    pub fn with_range(mut self, range: RangeInclusive<f64>) -> Self {
        self.range = range;
        self
    }

    pub fn reads(&self) -> usize {
        self.read_times.len()
    }

    pub fn read_times(&self) -> &[Instant] {
        &self.read_times
    }
}

#[async_trait]
impl SampledSensor for ScriptedSensor {
    async fn sample(&mut self) -> Option<f64> {
        self.read_times.push(Instant::now());
        self.script.pop_front().unwrap_or(self.fallback)
    }

    fn valid_range(&self) -> RangeInclusive<f64> {
        self.range.clone()
    }
}

#[derive(Default)]
pub struct RecordingActuator {
    pub applied: Vec<(ActuatorState, Instant)>,
}

impl Actuator for RecordingActuator {
    fn apply(&mut self, state: ActuatorState) {
        self.applied.push((state, Instant::now()));
    }
}
