//! Secure transport seam.

use async_trait::async_trait;
use thiserror::Error as ThisError;

/// Message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Broker address and identity for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(ThisError, Debug)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Connection(#[from] rumqttc::ConnectionError),

    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
}

/// An encrypted publish/subscribe session to the broker.
///
/// Implementations hold their trust anchors; `connect` authenticates the
/// broker against them. Only the session manager calls into a transport.
#[async_trait]
pub trait Transport: Send {
    /// Open a fresh session, replacing any previous one.
    async fn connect(&mut self, params: &SessionParams) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Service the session once: send keep-alives that are due and return
    /// the messages delivered since the last tick, in arrival order.
    async fn tick(&mut self) -> Result<Vec<InboundMessage>, TransportError>;

    /// Whether the session is believed open. Must not touch the network.
    fn is_connected(&self) -> bool;
}
