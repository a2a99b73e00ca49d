//! Connection registry
//!
//! The registry is the authoritative store of live client connections and
//! the single synchronization point shared by the lifecycle manager, the
//! delivery workers, and the admin channel.
//!
//! # Architecture
//!
//! ```text
//!                    Arc<ConnectionRegistry>
//!               ┌────────────────────────────────┐
//!               │ connections: HashMap<ClientId, │
//!               │   Arc<ConnectionEntry {        │
//!               │     state: AtomicU8,           │
//!               │     transport: Mutex<..>,      │
//!               │   }>                           │
//!               │ >                              │
//!               │ by_user: HashMap<UserId,       │
//!               │   Vec<ClientId>>               │
//!               └───────────────┬────────────────┘
//!                               │
//!         ┌─────────────────────┼─────────────────────┐
//!         │                     │                     │
//!         ▼                     ▼                     ▼
//!   [Accept loop]        [Delivery worker]      [Admin channel]
//!   register/supersede   lookup_* + write       remove_dead
//! ```
//!
//! # Locking discipline
//!
//! Both maps mutate under one `RwLock`, keeping the forward map and the
//! reverse index consistent at every instant. Transport writes take a
//! per-connection `Mutex` instead, so a slow socket never holds up the
//! maps and a transport never has two concurrent writers.

pub mod client;
pub mod error;
pub mod store;

pub use client::{BoxTransport, ClientId, ConnectionEntry, ConnectionState, UserId};
pub use error::RegistryError;
pub use store::ConnectionRegistry;
