//! SSE server and connection lifecycle
//!
//! Everything between `accept()` and a registered connection: admission
//! control, request parsing, authentication dispatch, replacement of a
//! reconnecting client's prior socket, and registration.

pub mod admission;
pub mod config;
pub mod listener;
pub mod request;
pub mod response;

pub use admission::{fd_ceiling, AdmissionError, AdmissionGate};
pub use config::ServerConfig;
pub use listener::SseServer;
pub use request::HttpRequest;
pub use response::HttpResponse;
