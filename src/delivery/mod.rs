//! Message delivery engine
//!
//! Renders SSE frames once per message and fans them out to the
//! addressed recipients through the registry. Delivery is best-effort:
//! one attempt per recipient, no retry, no re-queue. A recipient whose
//! transport fails is evicted.

pub mod frame;
pub mod worker;

pub use frame::{render, FrameError, CLOSE_FRAME, KEEPALIVE_FRAME};
pub use worker::WorkerPool;
