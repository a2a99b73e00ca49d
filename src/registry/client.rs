//! Per-connection types
//!
//! This module defines the connection identifiers and the per-connection
//! entry stored in the registry. The entry owns the transport exclusively;
//! every write goes through the entry's write guard, so a transport never
//! has two concurrent writers (and an eviction cannot close a transport
//! out from under an in-flight write).

use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::error::RegistryError;

/// Transport handle for one accepted connection
///
/// Boxed so tests can register in-memory duplex streams in place of
/// TCP sockets.
pub type BoxTransport = Box<dyn AsyncWrite + Send + Unpin>;

/// Logical owner of one or more connections
pub type UserId = i64;

/// Opaque unique identifier for a client connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client id from an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random client id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, not yet visible in the registry maps
    Registering = 0,
    /// Registered and eligible for delivery
    Active = 1,
    /// Evicted because a newer socket for the same client id arrived
    Superseded = 2,
    /// Evicted because the transport failed or was pruned
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Registering,
            1 => ConnectionState::Active,
            2 => ConnectionState::Superseded,
            _ => ConnectionState::Closed,
        }
    }
}

/// One registered connection
///
/// The transport sits behind a `Mutex`, the per-connection write guard.
/// The state is atomic so delivery can check it without taking the guard.
pub struct ConnectionEntry {
    /// Primary key
    pub client_id: ClientId,

    /// Logical owner
    pub user_id: UserId,

    state: AtomicU8,

    transport: Mutex<BoxTransport>,
}

impl ConnectionEntry {
    /// Create a new entry in the `Registering` state
    pub fn new(client_id: ClientId, user_id: UserId, transport: BoxTransport) -> Self {
        Self {
            client_id,
            user_id,
            state: AtomicU8::new(ConnectionState::Registering as u8),
            transport: Mutex::new(transport),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the connection is eligible for delivery
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Write a frame to the transport
    ///
    /// Fails with `ConnectionClosed` if the connection has been evicted,
    /// including an eviction that raced this call. A failed write marks
    /// the connection `Closed` so the liveness channel can prune it.
    pub async fn write_frame(&self, frame: &Bytes) -> Result<(), RegistryError> {
        if !self.is_active() {
            return Err(RegistryError::ConnectionClosed(self.client_id.clone()));
        }

        let mut transport = self.transport.lock().await;

        // Re-check under the guard: an eviction may have flipped the state
        // while we waited for the lock.
        if !self.is_active() {
            return Err(RegistryError::ConnectionClosed(self.client_id.clone()));
        }

        self.write_locked(&mut *transport, frame).await
    }

    /// Write a liveness probe (SSE comment) to the transport
    ///
    /// Same guard discipline as [`write_frame`](Self::write_frame); a
    /// failed probe marks the connection `Closed`.
    pub async fn probe(&self, frame: &'static [u8]) -> Result<(), RegistryError> {
        self.write_frame(&Bytes::from_static(frame)).await
    }

    /// Write a frame regardless of lifecycle state
    ///
    /// Used for the terminal `event: close` notification after an entry
    /// has already been removed from the registry maps.
    pub async fn write_unguarded(&self, frame: &[u8]) -> Result<(), RegistryError> {
        let mut transport = self.transport.lock().await;

        if let Err(e) = transport.write_all(frame).await {
            return Err(RegistryError::WriteFailed {
                client_id: self.client_id.clone(),
                reason: e.to_string(),
            });
        }
        if let Err(e) = transport.flush().await {
            return Err(RegistryError::WriteFailed {
                client_id: self.client_id.clone(),
                reason: e.to_string(),
            });
        }

        Ok(())
    }

    async fn write_locked(
        &self,
        transport: &mut BoxTransport,
        frame: &Bytes,
    ) -> Result<(), RegistryError> {
        let result = async {
            transport.write_all(frame).await?;
            transport.flush().await
        }
        .await;

        if let Err(e) = result {
            self.set_state(ConnectionState::Closed);
            return Err(RegistryError::WriteFailed {
                client_id: self.client_id.clone(),
                reason: e.to_string(),
            });
        }

        Ok(())
    }

    /// Shut down the transport
    ///
    /// Waits for any in-flight write to finish before closing. Errors are
    /// ignored; the peer may already be gone.
    pub async fn shutdown(&self) {
        let mut transport = self.transport.lock().await;
        let _ = transport.shutdown().await;
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}
