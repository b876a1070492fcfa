//! Session domain
//!
//! The registry owns session records; each record owns its members, queue,
//! playback state, controller bookkeeping, chat, and drift samples, all
//! behind one per-session lock.

pub mod chat;
pub mod controller;
pub mod expiry;
pub mod members;
pub mod playback;
pub mod queue;
pub mod record;
pub mod registry;

pub use controller::{ControllerArbiter, PendingOffer, PendingRequest};
pub use expiry::ExpiryHeap;
pub use members::{MemberInfo, MemberTable};
pub use playback::PlaybackState;
pub use queue::{SelectionChange, TrackQueue};
pub use record::Session;
pub use registry::{SessionHandle, SessionRegistry};
