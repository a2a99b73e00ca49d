//! Admission control
//!
//! Hard backpressure gate evaluated before any work is done on a newly
//! accepted transport. A connection is rejected when the process-wide
//! file-descriptor ceiling is reached or cannot be determined, or when
//! the registry has hit the configured ceiling. Rejections are expected
//! backpressure, not errors.

/// Why a connection attempt was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Connection count has reached the effective ceiling
    LimitReached { current: usize, limit: usize },
    /// The fd ceiling could not be determined; reject conservatively
    ResourceQuery,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::LimitReached { current, limit } => {
                write!(f, "connection limit reached ({}/{})", current, limit)
            }
            AdmissionError::ResourceQuery => {
                write!(f, "unable to determine file descriptor limit")
            }
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Where the fd ceiling comes from
#[derive(Debug, Clone, Copy)]
enum FdCeiling {
    /// Query the OS on every check
    System,
    /// Fixed value, for tests
    Fixed(Option<usize>),
}

/// Process-wide open-file-descriptor ceiling, per the OS
pub fn fd_ceiling() -> Option<usize> {
    // SAFETY: sysconf takes no pointers and only reads process limits.
    let limit = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if limit < 0 {
        None
    } else {
        Some(limit as usize)
    }
}

/// Admission gate for the accept loop
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    /// Configured connection ceiling (0 = fd ceiling only)
    max_connections: usize,

    fd_source: FdCeiling,
}

impl AdmissionGate {
    /// Gate backed by the real OS fd ceiling
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            fd_source: FdCeiling::System,
        }
    }

    /// Gate with a simulated fd ceiling, for tests
    pub fn with_fd_ceiling(max_connections: usize, fd_ceiling: Option<usize>) -> Self {
        Self {
            max_connections,
            fd_source: FdCeiling::Fixed(fd_ceiling),
        }
    }

    /// Decide whether a new connection may be admitted
    ///
    /// `current` is the registry size at the time of the accept. The fd
    /// ceiling is re-queried on every check so external limit changes
    /// take effect without a restart.
    pub fn check(&self, current: usize) -> Result<(), AdmissionError> {
        let fd_limit = match self.fd_source {
            FdCeiling::System => fd_ceiling(),
            FdCeiling::Fixed(limit) => limit,
        };

        let Some(fd_limit) = fd_limit else {
            return Err(AdmissionError::ResourceQuery);
        };

        let limit = if self.max_connections > 0 {
            self.max_connections.min(fd_limit)
        } else {
            fd_limit
        };

        if current >= limit {
            return Err(AdmissionError::LimitReached { current, limit });
        }

        Ok(())
    }
}
