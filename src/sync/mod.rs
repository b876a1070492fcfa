//! Time synchronization subsystem
//!
//! The responder answers round-trip timestamp RPCs, the drift book keeps
//! per-client convergence samples, and the adaptive broadcaster turns
//! those samples into a fan-out cadence.

pub mod broadcaster;
pub mod drift;
pub mod timesync;

pub use broadcaster::AdaptiveBroadcaster;
pub use drift::{DriftBook, DriftSample};
pub use timesync::TimeSyncReply;
