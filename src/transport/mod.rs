//! Transport adapter
//!
//! TCP accept loop, newline-delimited JSON framing, and per-connection
//! bounded send queues drained by dedicated writer tasks.

pub mod connection;
pub mod server;

pub use connection::{ConnHandle, StatsSnapshot, TransportStats};
pub use server::{ServerState, SyncServer};

#[cfg(test)]
mod tests;
