//! Registry error types
//!
//! Error types for connection registry and transport-write operations.

use super::client::ClientId;

/// Error type for registry operations
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// A connection with this client id is already registered
    AlreadyExists(ClientId),
    /// The connection was evicted or closed before the write began
    ConnectionClosed(ClientId),
    /// The transport write failed; the connection is presumed dead
    WriteFailed { client_id: ClientId, reason: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyExists(id) => write!(f, "Client already registered: {}", id),
            RegistryError::ConnectionClosed(id) => write!(f, "Connection closed: {}", id),
            RegistryError::WriteFailed { client_id, reason } => {
                write!(f, "Write to client {} failed: {}", client_id, reason)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
