//! Event routing
//!
//! Inbound frames are validated, authorized against session state, and
//! dispatched under the owning session's lock; outbound events fan out to
//! member send queues from the same critical section.

pub mod event;
pub mod handler;
pub mod rate_limit;
pub mod sanitize;
pub mod signaling;

pub use event::{Envelope, ServerEvent, SessionSnapshot, SyncStatePayload};
pub use handler::{ConnCtx, EventRouter};
pub use rate_limit::ChatRateLimiter;

#[cfg(test)]
mod tests;
