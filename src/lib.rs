//! # unison
//!
//! Server core for multi-user, real-time synchronized audio playback.
//!
//! Clients connect over a bidirectional event socket (newline-delimited
//! JSON over TCP), join a named session, and observe one shared playback
//! state. One member per session holds the controller role and drives
//! playback; the others converge on the controller-authoritative position
//! via adaptive `sync_state` broadcasts and a round-trip time-sync RPC.
//!
//! ## Example
//!
//! ```rust,no_run
//! use unison::{ServerConfig, SyncServer};
//!
//! # async fn example() -> Result<(), unison::ServerError> {
//! let mut server = SyncServer::with_defaults(ServerConfig::with_addr("127.0.0.1:7340"));
//! let addr = server.start().await?;
//! println!("listening on {addr}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Server clock
pub mod clock;
/// Configuration
pub mod config;
/// Error types
pub mod error;
/// External collaborator interfaces
pub mod library;
/// Event routing
pub mod router;
/// Session domain
pub mod session;
/// Time synchronization
pub mod sync;
/// Transport adapter
pub mod transport;
/// Core types
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports
pub use clock::ServerClock;
pub use config::ServerConfig;
pub use error::{EventError, ServerError};
pub use library::{FileCleanup, NoCleanup, NoSamples, SampleLibrary, StaticSampleLibrary};
pub use router::{ServerEvent, SessionSnapshot};
pub use session::{Session, SessionRegistry};
pub use sync::{AdaptiveBroadcaster, DriftSample};
pub use transport::{ServerState, SyncServer};
pub use types::{ChatMessage, ClientId, ConnId, SessionId, Track};
