//! Connection registry implementation
//!
//! The authoritative map of live client connections plus the reverse
//! index from logical user to that user's connections. Both maps mutate
//! under one `RwLock`, so they can never disagree: a client id present in
//! the forward map appears exactly once in its owner's reverse set, and
//! an eviction removes it from both in a single atomic step.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::client::{BoxTransport, ClientId, ConnectionEntry, ConnectionState, UserId};
use super::error::RegistryError;

#[derive(Default)]
struct Maps {
    /// Forward map: client id to connection entry
    connections: HashMap<ClientId, Arc<ConnectionEntry>>,

    /// Reverse index: user id to that user's client ids
    by_user: HashMap<UserId, Vec<ClientId>>,
}

impl Maps {
    fn remove(&mut self, client_id: &ClientId) -> Option<Arc<ConnectionEntry>> {
        let entry = self.connections.remove(client_id)?;

        if let Some(clients) = self.by_user.get_mut(&entry.user_id) {
            clients.retain(|id| id != client_id);
            if clients.is_empty() {
                self.by_user.remove(&entry.user_id);
            }
        }

        Some(entry)
    }
}

/// Central registry for all active connections
///
/// Thread-safe via `RwLock`; delivery workers take read access for
/// lookups while the lifecycle manager and the admin channel take write
/// access for registration and eviction. Transport writes are guarded
/// per connection by [`ConnectionEntry`], not by this lock.
pub struct ConnectionRegistry {
    maps: RwLock<Maps>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Register a new connection
    ///
    /// Inserts into the forward map and the reverse index atomically and
    /// activates the entry. Fails with `AlreadyExists` if the client id
    /// is taken; the caller resolves the conflict by evicting first, this
    /// operation never overwrites.
    pub async fn register(
        &self,
        client_id: ClientId,
        user_id: UserId,
        transport: BoxTransport,
    ) -> Result<Arc<ConnectionEntry>, RegistryError> {
        let mut maps = self.maps.write().await;

        if maps.connections.contains_key(&client_id) {
            return Err(RegistryError::AlreadyExists(client_id));
        }

        let entry = Arc::new(ConnectionEntry::new(client_id.clone(), user_id, transport));
        entry.set_state(ConnectionState::Active);

        maps.connections
            .insert(client_id.clone(), Arc::clone(&entry));
        maps.by_user
            .entry(user_id)
            .or_default()
            .push(client_id.clone());

        tracing::info!(client = %client_id, user = user_id, "Connection registered");
        Ok(entry)
    }

    /// Evict a connection whose transport failed or was pruned
    ///
    /// Removes it from both maps and marks it `Closed`. Returns the entry
    /// so the caller can shut the transport down; `None` if absent.
    pub async fn evict(&self, client_id: &ClientId) -> Option<Arc<ConnectionEntry>> {
        self.remove_as(client_id, ConnectionState::Closed).await
    }

    /// Evict a connection that is being replaced by a newer socket
    ///
    /// Same removal as [`evict`](Self::evict) but leaves the entry in the
    /// `Superseded` state so diagnostics can tell the two apart.
    pub async fn supersede(&self, client_id: &ClientId) -> Option<Arc<ConnectionEntry>> {
        self.remove_as(client_id, ConnectionState::Superseded).await
    }

    async fn remove_as(
        &self,
        client_id: &ClientId,
        state: ConnectionState,
    ) -> Option<Arc<ConnectionEntry>> {
        let mut maps = self.maps.write().await;
        let entry = maps.remove(client_id)?;
        entry.set_state(state);

        tracing::debug!(client = %client_id, state = ?state, "Connection evicted");
        Some(entry)
    }

    /// Look up a single connection by client id
    pub async fn lookup_one(&self, client_id: &ClientId) -> Option<Arc<ConnectionEntry>> {
        self.maps.read().await.connections.get(client_id).cloned()
    }

    /// Snapshot of a user's current client ids
    ///
    /// The snapshot may be stale immediately after return; callers must
    /// tolerate entries evicted concurrently.
    pub async fn lookup_user(&self, user_id: UserId) -> Vec<ClientId> {
        self.maps
            .read()
            .await
            .by_user
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every registered client id, for broadcast
    pub async fn lookup_all(&self) -> Vec<ClientId> {
        self.maps.read().await.connections.keys().cloned().collect()
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.maps.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every connection failing a liveness predicate
    ///
    /// Used by the admin channel after probing. Removal from both maps is
    /// atomic per entry; the removed entries are returned so the caller
    /// can shut their transports down outside the lock.
    pub async fn remove_dead<F>(&self, predicate: F) -> Vec<Arc<ConnectionEntry>>
    where
        F: Fn(&ConnectionEntry) -> bool,
    {
        let mut maps = self.maps.write().await;

        let dead: Vec<ClientId> = maps
            .connections
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = Vec::with_capacity(dead.len());
        for client_id in &dead {
            if let Some(entry) = maps.remove(client_id) {
                entry.set_state(ConnectionState::Closed);
                tracing::info!(client = %client_id, "Dead connection pruned");
                removed.push(entry);
            }
        }

        removed
    }

    /// Drain the registry at shutdown
    ///
    /// Marks every entry `Closed` and returns them for transport
    /// shutdown by the caller.
    pub async fn close_all(&self) -> Vec<Arc<ConnectionEntry>> {
        let mut maps = self.maps.write().await;
        maps.by_user.clear();

        let entries: Vec<_> = maps.connections.drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            entry.set_state(ConnectionState::Closed);
        }

        entries
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
