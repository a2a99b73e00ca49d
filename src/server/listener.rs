//! SSE server listener
//!
//! The connection lifecycle manager: accepts transports, applies
//! admission control, parses and authenticates the request, replaces any
//! prior connection with the same client id, and registers the new
//! connection. Each attempt either reaches `Registered` or is rejected
//! at a gate with no registry mutation.
//!
//! The loop is serial: every per-connection step is bounded (admission
//! is a counter check, the request read is under a timeout, eviction
//! notifications run off-loop under a bound), so one slow client cannot
//! stall admission of others indefinitely.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::auth::{AuthOutcome, Authenticator, Credentials};
use crate::delivery::frame::CLOSE_FRAME;
use crate::error::Result;
use crate::registry::{BoxTransport, ConnectionRegistry};
use crate::server::admission::AdmissionGate;
use crate::server::config::ServerConfig;
use crate::server::request;
use crate::server::response::HttpResponse;

/// Bound on delivering the close notification to a superseded socket
/// when no write timeout is configured. The notification is best-effort;
/// the accept loop never waits on it.
const EVICTION_WRITE_BOUND: Duration = Duration::from_secs(5);

/// SSE proxy server
pub struct SseServer<A: Authenticator> {
    config: ServerConfig,
    auth: Arc<A>,
    registry: Arc<ConnectionRegistry>,
    gate: AdmissionGate,
}

impl<A: Authenticator> SseServer<A> {
    /// Create a new server
    pub fn new(config: ServerConfig, auth: A, registry: Arc<ConnectionRegistry>) -> Self {
        let gate = AdmissionGate::new(config.max_connections);
        Self {
            config,
            auth: Arc::new(auth),
            registry,
            gate,
        }
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "SSE proxy listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    ///
    /// Stops accepting when `shutdown` resolves; registered transports
    /// are closed by the caller draining the registry.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "SSE proxy listening");

        self.serve_on(listener, shutdown).await
    }

    /// Accept connections from a pre-bound listener until `shutdown`
    /// resolves
    ///
    /// Useful when the caller needs the listener's local address, e.g.
    /// binding to an ephemeral port.
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Drive one connection attempt through the lifecycle gates
    ///
    /// Every failure is local to this attempt; the loop continues.
    async fn handle_connection(&self, mut socket: TcpStream, peer_addr: SocketAddr) {
        // Admission control comes before any work on the transport.
        if let Err(reason) = self.gate.check(self.registry.len().await) {
            tracing::debug!(peer = %peer_addr, %reason, "Connection rejected at admission");
            return;
        }

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let read = tokio::time::timeout(
            self.config.request_timeout,
            request::read_request(&mut socket),
        );
        let parsed = match read.await {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::debug!(peer = %peer_addr, "Request read timed out");
                return;
            }
        };

        let http_request = match parsed {
            Ok(Some(req)) => req,
            Ok(None) => {
                // Peer disconnected before completing the request.
                return;
            }
            Err(e) => {
                tracing::debug!(peer = %peer_addr, error = %e, "Unreadable request");
                let _ = socket.write_all(&HttpResponse::bad_request("bad request\n").render()).await;
                return;
            }
        };

        let credentials = match self.auth.authenticate(&http_request).await {
            AuthOutcome::Accept(credentials) => credentials,
            AuthOutcome::Reject(response) => {
                tracing::debug!(peer = %peer_addr, status = response.status(), "Request rejected");
                let _ = socket.write_all(&response.render()).await;
                let _ = socket.shutdown().await;
                return;
            }
        };

        self.replace_and_register(socket, peer_addr, credentials).await;
    }

    async fn replace_and_register(
        &self,
        mut socket: TcpStream,
        peer_addr: SocketAddr,
        credentials: Credentials,
    ) {
        let Credentials { client_id, user_id } = credentials;

        // Replacement: retire any prior connection for this client id
        // before the new one becomes visible. The close notification runs
        // off-loop under a bound; a superseded peer that stopped reading
        // must not hold up admission of anyone else.
        if let Some(old) = self.registry.supersede(&client_id).await {
            tracing::info!(client = %client_id, "Closing pre-existing connection for client");

            let bound = self.config.write_timeout.unwrap_or(EVICTION_WRITE_BOUND);
            let retired = client_id.clone();
            tokio::spawn(async move {
                let notify = async {
                    if let Err(e) = old.write_unguarded(CLOSE_FRAME).await {
                        tracing::debug!(client = %retired, error = %e, "Close notification not delivered");
                    }
                    old.shutdown().await;
                };
                if tokio::time::timeout(bound, notify).await.is_err() {
                    tracing::debug!(client = %retired, "Close notification abandoned, peer not reading");
                }
            });
        }

        if let Err(e) = socket
            .write_all(&HttpResponse::sse_preamble().render())
            .await
        {
            tracing::debug!(peer = %peer_addr, error = %e, "Failed to write SSE preamble");
            return;
        }

        match self
            .registry
            .register(client_id.clone(), user_id, Box::new(socket) as BoxTransport)
            .await
        {
            Ok(_) => {
                tracing::debug!(client = %client_id, user = user_id, peer = %peer_addr, "Connection active");
            }
            Err(e) => {
                // Unreachable while this loop is the only registrar, but
                // never overwrite silently.
                tracing::error!(client = %client_id, error = %e, "Registration failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::registry::ClientId;
    use crate::server::request::HttpRequest;

    /// Accepts everyone as a fixed identity, counting invocations
    struct CountingAuth {
        calls: Arc<AtomicUsize>,
        client_id: &'static str,
        user_id: i64,
    }

    impl CountingAuth {
        fn new(client_id: &'static str, user_id: i64) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    client_id,
                    user_id,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Authenticator for CountingAuth {
        async fn authenticate(&self, _request: &HttpRequest) -> AuthOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AuthOutcome::Accept(Credentials {
                client_id: ClientId::new(self.client_id),
                user_id: self.user_id,
            })
        }
    }

    async fn spawn_server(
        config: ServerConfig,
        auth: CountingAuth,
    ) -> (SocketAddr, Arc<ConnectionRegistry>, tokio::sync::oneshot::Sender<()>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let server = SseServer::new(config, auth, Arc::clone(&registry));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = server
                .serve_on(listener, async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        (addr, registry, stop_tx)
    }

    async fn subscribe(addr: SocketAddr) -> TcpStream {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(b"GET /events HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();
        socket
    }

    async fn read_some(socket: &mut TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; 4096];
        match tokio::time::timeout(std::time::Duration::from_millis(200), socket.read(&mut buf))
            .await
        {
            Ok(Ok(n)) => buf[..n].to_vec(),
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_successful_subscription_registers() {
        let (auth, _calls) = CountingAuth::new("abc", 7);
        let (addr, registry, _stop) = spawn_server(ServerConfig::default(), auth).await;

        let mut socket = subscribe(addr).await;
        let preamble = read_some(&mut socket).await;
        let text = String::from_utf8(preamble).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("text/event-stream"));

        assert!(registry.lookup_one(&ClientId::new("abc")).await.is_some());
        assert_eq!(registry.lookup_user(7).await, vec![ClientId::new("abc")]);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_prior_connection() {
        let (auth, _calls) = CountingAuth::new("abc", 7);
        let (addr, registry, _stop) = spawn_server(ServerConfig::default(), auth).await;

        let mut first = subscribe(addr).await;
        let _ = read_some(&mut first).await; // preamble

        // Wait until the first connection is registered.
        while registry.len().await == 0 {
            tokio::task::yield_now().await;
        }

        let mut second = subscribe(addr).await;
        let _ = read_some(&mut second).await;

        // Prior transport receives exactly the close notification.
        let closing = read_some(&mut first).await;
        assert_eq!(closing, b"event: close\ndata: new socket for same client\n\n");

        // New connection is the sole entry, once, in the reverse set.
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.lookup_user(7).await, vec![ClientId::new("abc")]);
    }

    #[tokio::test]
    async fn test_admission_rejects_before_auth() {
        let config = ServerConfig::default().max_connections(1);
        let (auth, calls) = CountingAuth::new("abc", 7);
        let (addr, registry, _stop) = spawn_server(config, auth).await;

        let mut first = subscribe(addr).await;
        let _ = read_some(&mut first).await;
        while registry.len().await == 0 {
            tokio::task::yield_now().await;
        }

        // Registry is at the ceiling: the next attempt is dropped with no
        // response and no authentication work.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let _ = second
            .write_all(b"GET /events HTTP/1.1\r\n\r\n")
            .await;
        assert!(read_some(&mut second).await.is_empty());
        assert_eq!(registry.len().await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_early_disconnect_is_noop() {
        let (auth, _calls) = CountingAuth::new("abc", 7);
        let (addr, registry, _stop) = spawn_server(ServerConfig::default(), auth).await;

        let socket = TcpStream::connect(addr).await.unwrap();
        drop(socket);

        // Server keeps accepting afterwards.
        let mut ok = subscribe(addr).await;
        assert!(!read_some(&mut ok).await.is_empty());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_stuck_superseded_peer_does_not_block_admission() {
        use crate::auth::HeaderAuthenticator;

        let registry = Arc::new(ConnectionRegistry::new());
        let server = SseServer::new(
            ServerConfig::default(),
            HeaderAuthenticator::new(),
            Arc::clone(&registry),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve_on(listener, std::future::pending()).await;
        });

        // Prior connection whose peer holds the stream open but never
        // reads; its one-byte buffer is already full, so any further
        // write blocks.
        let (near, _stuck_far) = tokio::io::duplex(1);
        let entry = registry
            .register(ClientId::new("abc"), 7, Box::new(near))
            .await
            .unwrap();
        entry.write_unguarded(b"x").await.unwrap();

        // Reconnect as the same client; the close notification cannot
        // complete.
        let mut replacement = TcpStream::connect(addr).await.unwrap();
        replacement
            .write_all(b"GET /events HTTP/1.1\r\nX-User-Id: 7\r\nX-Client-Id: abc\r\n\r\n")
            .await
            .unwrap();
        let _ = read_some(&mut replacement).await;

        // An unrelated client is still admitted promptly.
        let mut other = TcpStream::connect(addr).await.unwrap();
        other
            .write_all(b"GET /events HTTP/1.1\r\nX-User-Id: 8\r\nX-Client-Id: other\r\n\r\n")
            .await
            .unwrap();

        let admitted = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while registry.lookup_one(&ClientId::new("other")).await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(
            admitted.is_ok(),
            "admission stalled behind a stuck eviction write"
        );
    }

    struct RejectingAuth;

    #[async_trait]
    impl Authenticator for RejectingAuth {
        async fn authenticate(&self, _request: &HttpRequest) -> AuthOutcome {
            AuthOutcome::Reject(HttpResponse::unauthorized("no\n"))
        }
    }

    #[tokio::test]
    async fn test_auth_rejection_writes_response() {
        let registry = Arc::new(ConnectionRegistry::new());
        let server = SseServer::new(ServerConfig::default(), RejectingAuth, Arc::clone(&registry));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve_on(listener, std::future::pending()).await;
        });

        let mut socket = subscribe(addr).await;
        let response = read_some(&mut socket).await;
        let text = String::from_utf8(response).unwrap();

        assert!(text.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(registry.is_empty().await);
    }
}
