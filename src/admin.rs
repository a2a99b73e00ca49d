//! Admin and liveness channel
//!
//! Out-of-band control surface on a local Unix socket. It observes and
//! prunes the connection set strictly through the registry's own
//! operations; it keeps no private copy of connection state.
//!
//! Line protocol, one command per line:
//! - `list`  — client ids of every registered connection
//! - `count` — number of registered connections
//! - `prune` — probe every connection with an SSE comment keepalive and
//!   evict the ones whose transport is dead

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::delivery::frame::KEEPALIVE_FRAME;
use crate::error::Result;
use crate::registry::{ConnectionRegistry, ConnectionState};

/// Bound on one liveness probe. A connection whose send buffer stays
/// full this long is as dead as one whose write errors.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Control channel server
pub struct AdminChannel {
    socket_path: PathBuf,
    registry: Arc<ConnectionRegistry>,
}

impl AdminChannel {
    pub fn new(socket_path: PathBuf, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            socket_path,
            registry,
        }
    }

    /// Bind the control socket
    ///
    /// Removes any stale socket file left by a previous run first.
    /// Separate from serving so a failed bind surfaces as a startup
    /// error instead of vanishing inside a spawned task.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(path = %self.socket_path.display(), "Admin channel ready");
        Ok(listener)
    }

    /// Serve control connections until `shutdown` resolves
    ///
    /// The socket file is cleaned up on exit.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.bind()?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve control connections from a pre-bound listener until
    /// `shutdown` resolves
    pub async fn serve_on<F>(&self, listener: UnixListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Admin channel stopping");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        let _ = std::fs::remove_file(&self.socket_path);
        result
    }

    async fn accept_loop(&self, listener: &UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    if let Err(e) = self.serve_session(stream).await {
                        tracing::debug!(error = %e, "Admin session failed");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept admin connection");
                }
            }
        }
    }

    async fn serve_session(&self, stream: UnixStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            let reply = self.dispatch(line.trim()).await;
            write_half.write_all(reply.as_bytes()).await?;
        }

        Ok(())
    }

    async fn dispatch(&self, command: &str) -> String {
        match command {
            "list" => {
                let mut out = String::new();
                for client_id in self.registry.lookup_all().await {
                    out.push_str(client_id.as_str());
                    out.push('\n');
                }
                out.push_str("ok\n");
                out
            }
            "count" => format!("{}\n", self.registry.len().await),
            "prune" => {
                let pruned = self.prune().await;
                format!("pruned {}\n", pruned)
            }
            "" => String::new(),
            other => {
                tracing::debug!(command = other, "Unknown admin command");
                "unknown command\n".to_owned()
            }
        }
    }

    /// Probe every connection and evict the dead ones
    async fn prune(&self) -> usize {
        // A failed probe marks the connection Closed; remove_dead then
        // takes everything in that state out of both maps atomically. A
        // probe that never completes (peer stopped reading, buffer full)
        // is evicted directly.
        let mut stalled = 0;
        for client_id in self.registry.lookup_all().await {
            let Some(entry) = self.registry.lookup_one(&client_id).await else {
                continue;
            };
            match tokio::time::timeout(PROBE_TIMEOUT, entry.probe(KEEPALIVE_FRAME)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(client = %client_id, error = %e, "Probe failed");
                }
                Err(_) => {
                    tracing::debug!(client = %client_id, "Probe timed out");
                    if let Some(dead) = self.registry.evict(&client_id).await {
                        stalled += 1;
                        tokio::spawn(async move {
                            let _ = tokio::time::timeout(PROBE_TIMEOUT, dead.shutdown()).await;
                        });
                    }
                }
            }
        }

        let dead = self
            .registry
            .remove_dead(|entry| entry.state() == ConnectionState::Closed)
            .await;

        for entry in &dead {
            entry.shutdown().await;
        }
        stalled + dead.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::registry::{BoxTransport, ClientId};

    fn socket_path() -> PathBuf {
        std::env::temp_dir().join(format!("sse-proxy-test-{}.sock", uuid::Uuid::new_v4()))
    }

    async fn register(registry: &ConnectionRegistry, id: &str) -> tokio::io::DuplexStream {
        let (near, far) = tokio::io::duplex(1024);
        registry
            .register(ClientId::new(id), 1, Box::new(near) as BoxTransport)
            .await
            .unwrap();
        far
    }

    async fn send_command(path: &PathBuf, command: &str) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    async fn spawn_admin(registry: Arc<ConnectionRegistry>) -> PathBuf {
        let path = socket_path();
        let admin = AdminChannel::new(path.clone(), registry);

        tokio::spawn(async move {
            let _ = admin.run_until(std::future::pending()).await;
        });

        // Wait for the socket file to appear.
        while !path.exists() {
            tokio::task::yield_now().await;
        }
        path
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _a = register(&registry, "a").await;
        let _b = register(&registry, "b").await;

        let path = spawn_admin(Arc::clone(&registry)).await;

        assert_eq!(send_command(&path, "count").await, "2\n");

        let listing = send_command(&path, "list").await;
        assert!(listing.contains("a\n"));
        assert!(listing.contains("b\n"));
        assert!(listing.ends_with("ok\n"));
    }

    #[tokio::test]
    async fn test_prune_evicts_dead_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _live = register(&registry, "live").await;
        let dead = register(&registry, "dead").await;
        drop(dead); // peer hung up

        let path = spawn_admin(Arc::clone(&registry)).await;

        assert_eq!(send_command(&path, "prune").await, "pruned 1\n");
        assert_eq!(registry.lookup_all().await, vec![ClientId::new("live")]);
    }

    #[tokio::test]
    async fn test_prune_evicts_stalled_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _live = register(&registry, "live").await;

        // Peer holds the stream open but never reads; the one-byte
        // buffer is already full, so the probe can never complete.
        let (near, _stuck_far) = tokio::io::duplex(1);
        let entry = registry
            .register(ClientId::new("stuck"), 2, Box::new(near) as BoxTransport)
            .await
            .unwrap();
        entry.write_unguarded(b"x").await.unwrap();

        let path = spawn_admin(Arc::clone(&registry)).await;

        assert_eq!(send_command(&path, "prune").await, "pruned 1\n");
        assert_eq!(registry.lookup_all().await, vec![ClientId::new("live")]);
    }

    #[tokio::test]
    async fn test_unbindable_socket_path_is_reported() {
        let registry = Arc::new(ConnectionRegistry::new());
        let admin = AdminChannel::new(PathBuf::from("/nonexistent/admin.sock"), registry);

        assert!(admin.bind().is_err());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let registry = Arc::new(ConnectionRegistry::new());
        let path = spawn_admin(registry).await;

        assert_eq!(send_command(&path, "reboot").await, "unknown command\n");
    }
}
