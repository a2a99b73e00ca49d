//! Delivery worker pool
//!
//! A fixed-size pool of tasks that drain the delivery queue and perform
//! addressed fan-out writes through the registry. Every failure on this
//! path is handled locally: a malformed message, an unknown recipient, or
//! a dead transport never stops a worker or stalls the queue.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::frame;
use crate::message::{Message, MessageType};
use crate::queue::DeliveryQueue;
use crate::registry::{ClientId, ConnectionRegistry, RegistryError};

/// Fixed-size pool of delivery workers
///
/// Worker count is set at spawn time; there is no dynamic scaling.
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers against the shared queue and registry
    pub fn spawn(
        count: usize,
        queue: Arc<DeliveryQueue>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self::spawn_with_timeout(count, queue, registry, None)
    }

    /// Spawn workers with a per-write timeout
    ///
    /// A write exceeding the timeout is treated as a transport failure:
    /// logged, skipped, and the connection evicted.
    pub fn spawn_with_timeout(
        count: usize,
        queue: Arc<DeliveryQueue>,
        registry: Arc<ConnectionRegistry>,
        write_timeout: Option<Duration>,
    ) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, registry, write_timeout).await;
                })
            })
            .collect();

        Self { handles }
    }

    /// Number of workers in the pool
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    ///
    /// Workers exit when the queue returns its shutdown sentinel.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<DeliveryQueue>,
    registry: Arc<ConnectionRegistry>,
    write_timeout: Option<Duration>,
) {
    tracing::info!(worker = worker_id, "Delivery worker started");

    while let Some(message) = queue.pop().await {
        dispatch(&message, &registry, write_timeout).await;
    }

    tracing::info!(worker = worker_id, "Delivery worker stopped");
}

/// Deliver one message to its addressed recipients
///
/// Per-recipient failures are independent; one dead transport never
/// aborts delivery to the rest.
pub(crate) async fn dispatch(
    message: &Message,
    registry: &ConnectionRegistry,
    write_timeout: Option<Duration>,
) {
    let frame = match frame::render(message) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(message_id = %message.message_id, error = %e, "Malformed message dropped");
            return;
        }
    };

    match message.message_type {
        MessageType::Direct => {
            let Some(recipient) = message.recipient.as_deref() else {
                tracing::warn!(message_id = %message.message_id, "Direct message without recipient dropped");
                return;
            };
            let client_id = ClientId::from(recipient);

            if registry.lookup_one(&client_id).await.is_none() {
                tracing::warn!(
                    message_id = %message.message_id,
                    client = %client_id,
                    "Unknown recipient, message dropped"
                );
                return;
            }
            write_to(registry, &client_id, &frame, write_timeout).await;
        }
        MessageType::User => {
            let Some(user_id) = message.recipient.as_deref().and_then(|r| r.parse().ok()) else {
                tracing::warn!(message_id = %message.message_id, "User message without numeric recipient dropped");
                return;
            };

            let clients = registry.lookup_user(user_id).await;
            if clients.is_empty() {
                tracing::warn!(
                    message_id = %message.message_id,
                    user = user_id,
                    "Unknown recipient user, message dropped"
                );
                return;
            }
            for client_id in clients {
                write_to(registry, &client_id, &frame, write_timeout).await;
            }
        }
        MessageType::Broadcast => {
            for client_id in registry.lookup_all().await {
                write_to(registry, &client_id, &frame, write_timeout).await;
            }
        }
        MessageType::Group => {
            tracing::warn!(
                message_id = %message.message_id,
                "Group messages are not supported, message dropped"
            );
        }
    }
}

/// Write a frame to one recipient, evicting it on transport failure
async fn write_to(
    registry: &ConnectionRegistry,
    client_id: &ClientId,
    frame: &Bytes,
    write_timeout: Option<Duration>,
) {
    // The snapshot that produced this client id may already be stale.
    let Some(entry) = registry.lookup_one(client_id).await else {
        tracing::debug!(client = %client_id, "Recipient evicted before write");
        return;
    };

    let result = match write_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, entry.write_frame(frame)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::WriteFailed {
                client_id: client_id.clone(),
                reason: "write timed out".to_owned(),
            }),
        },
        None => entry.write_frame(frame).await,
    };

    match result {
        Ok(()) => {}
        Err(RegistryError::ConnectionClosed(_)) => {
            // Lost the race with an eviction; nothing to clean up.
            tracing::debug!(client = %client_id, "Recipient closed mid-dispatch");
        }
        Err(e) => {
            tracing::warn!(client = %client_id, error = %e, "Write failed, evicting connection");
            if let Some(dead) = registry.evict(client_id).await {
                dead.shutdown().await;
            }
        }
    }
}
