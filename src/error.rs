use crate::instance_lock::InstanceLockError;
use crate::session::{SessionState, TransportError};
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AgentError {
    #[error("Session not ready (state: {0:?})")]
    NotReady(SessionState),

    #[error("Publish to {topic} failed: {source}")]
    PublishFailed {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("Publish to {0} timed out")]
    PublishTimeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read trust bundle {}: {source}", .path.display())]
    TrustBundle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InstanceLock(#[from] InstanceLockError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
