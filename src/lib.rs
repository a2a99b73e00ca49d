//! SSE fan-out proxy
//!
//! Terminates many long-lived Server-Sent-Events connections and fans
//! out messages produced elsewhere to the addressed subset: one client,
//! every connection of a logical user, or everyone.
//!
//! # Architecture
//!
//! ```text
//! producers ──► IngestServer ──► DeliveryQueue ──► WorkerPool
//!                                                      │ lookup + write
//!                                                      ▼
//! clients ──► SseServer (accept/auth/replace) ──► ConnectionRegistry
//!                                                      ▲
//!                              AdminChannel ───────────┘ list/prune
//! ```
//!
//! Delivery is best-effort: one attempt per recipient, no retry, no
//! persistence. The registry is the only state shared across roles.

pub mod admin;
pub mod auth;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod message;
pub mod queue;
pub mod registry;
pub mod server;

pub use admin::AdminChannel;
pub use auth::{AuthOutcome, Authenticator, Credentials};
pub use delivery::WorkerPool;
pub use error::{Error, Result};
pub use ingest::IngestServer;
pub use message::{Message, MessageType};
pub use queue::DeliveryQueue;
pub use registry::{ClientId, ConnectionRegistry, UserId};
pub use server::{ServerConfig, SseServer};
