//! Single instance lock using Unix socket.
//!
//! A broker drops the older session when a second client connects with the
//! same client id, so two agents sharing an id would keep kicking each other
//! off. The lock is keyed by client id and held for the process lifetime.
//! Uses a Unix socket which is automatically cleaned up by the OS when the
//! process dies, avoiding stale lock files.

use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another agent with the same client id is already running.
    #[error("another agent is already running as client {0:?}")]
    AlreadyRunning(String),

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Single instance lock using a Unix socket.
///
/// The lock is held as long as this struct exists. When dropped, the socket
/// file is removed. If the process crashes, the OS automatically removes
/// the socket, preventing stale locks.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock for `client_id` in the user's runtime directory.
    pub fn acquire(client_id: &str) -> Result<Self, InstanceLockError> {
        Self::acquire_at(Self::socket_path(client_id), client_id)
    }

    /// Acquire the lock at an explicit socket path.
    pub fn acquire_at(path: PathBuf, client_id: &str) -> Result<Self, InstanceLockError> {
        // A socket left behind by a SIGKILL'd process refuses connections
        if path.exists() {
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(_) => return Err(InstanceLockError::AlreadyRunning(client_id.to_string())),
                Err(_) => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                // Another instance bound between our check and bind
                Err(InstanceLockError::AlreadyRunning(client_id.to_string()))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Socket path for a client id, under the runtime dir or /tmp.
    pub fn socket_path(client_id: &str) -> PathBuf {
        let safe: String = client_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        dirs::runtime_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(format!("telemetry-agent-{safe}.sock"))
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Clean up the socket file on normal exit
        let _ = std::fs::remove_file(&self.path);
    }
}
