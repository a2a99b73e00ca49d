//! Server configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the SSE listener binds to
    pub bind_addr: SocketAddr,

    /// Delivery worker count
    pub workers: usize,

    /// Static ceiling on the worker pool size
    ///
    /// The effective pool size is `workers.min(max_workers)`.
    pub max_workers: usize,

    /// Maximum registered connections (0 = fd ceiling only)
    pub max_connections: usize,

    /// Bound on reading the HTTP request head from a new transport
    pub request_timeout: Duration,

    /// Per-frame write bound; a write exceeding it evicts the connection
    /// (None = wait indefinitely)
    pub write_timeout: Option<Duration>,

    /// Address the ingestion listener binds to
    pub ingest_addr: SocketAddr,

    /// Path of the admin/liveness control socket
    pub control_socket: PathBuf,

    /// Enable TCP_NODELAY on accepted transports
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".parse().unwrap(),
            workers: 1,
            max_workers: 1,
            max_connections: 0, // fd ceiling only
            request_timeout: Duration::from_secs(10),
            write_timeout: Some(Duration::from_secs(30)),
            ingest_addr: "127.0.0.1:8082".parse().unwrap(),
            control_socket: PathBuf::from("/tmp/sse-proxy.sock"),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the worker pool ceiling
    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the connection ceiling
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the request-read timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per-frame write timeout
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Effective worker pool size: `workers` capped by `max_workers`,
    /// never zero
    pub fn pool_size(&self) -> usize {
        self.workers.min(self.max_workers).max(1)
    }

    /// Load configuration from a JSON file
    ///
    /// Absent fields keep their defaults. A missing or unreadable file
    /// is a startup failure.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot open config file {}: {}", path.display(), e)))?;

        let file: FileConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse config file {}: {}", path.display(), e)))?;

        file.apply(Self::default())
    }
}

/// On-disk configuration schema; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<String>,
    workers: Option<usize>,
    max_workers: Option<usize>,
    max_connections: Option<usize>,
    request_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    ingest_addr: Option<String>,
    control_socket: Option<PathBuf>,
    tcp_nodelay: Option<bool>,
}

impl FileConfig {
    fn apply(self, mut config: ServerConfig) -> Result<ServerConfig> {
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("invalid bind_addr {:?}: {}", addr, e)))?;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max) = self.max_workers {
            config.max_workers = max;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.write_timeout_secs {
            config.write_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(addr) = self.ingest_addr {
            config.ingest_addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("invalid ingest_addr {:?}: {}", addr, e)))?;
        }
        if let Some(path) = self.control_socket {
            config.control_socket = path;
        }
        if let Some(nodelay) = self.tcp_nodelay {
            config.tcp_nodelay = nodelay;
        }
        Ok(config)
    }
}
