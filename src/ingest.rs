//! Message ingestion boundary
//!
//! Accepts producer connections carrying newline-delimited JSON in the
//! ingestion schema (see [`Message`]) and pushes decoded messages onto
//! the delivery queue. A malformed line is logged and skipped; it never
//! disturbs the producer connection or other producers. FIFO order is
//! preserved per producer connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::message::Message;
use crate::queue::DeliveryQueue;

/// Listener that feeds the delivery queue from producer connections
pub struct IngestServer {
    addr: SocketAddr,
    queue: Arc<DeliveryQueue>,
}

impl IngestServer {
    pub fn new(addr: SocketAddr, queue: Arc<DeliveryQueue>) -> Self {
        Self { addr, queue }
    }

    /// Bind the ingestion listener
    ///
    /// Separate from serving so a failed bind surfaces as a startup
    /// error instead of vanishing inside a spawned task.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "Ingestion listener ready");
        Ok(listener)
    }

    /// Accept producers until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    /// Accept producers from a pre-bound listener until `shutdown`
    /// resolves
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Ingestion listener stopping");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let queue = Arc::clone(&self.queue);
                    tokio::spawn(async move {
                        consume_producer(socket, peer_addr, queue).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept producer");
                }
            }
        }
    }
}

async fn consume_producer(socket: TcpStream, peer_addr: SocketAddr, queue: Arc<DeliveryQueue>) {
    tracing::debug!(peer = %peer_addr, "Producer connected");

    let mut lines = BufReader::new(socket).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(&line) {
                    Ok(message) => {
                        tracing::trace!(message_id = %message.message_id, "Message ingested");
                        queue.push(message);
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer_addr, error = %e, "Undecodable message skipped");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(peer = %peer_addr, error = %e, "Producer read failed");
                break;
            }
        }
    }

    tracing::debug!(peer = %peer_addr, "Producer disconnected");
}
