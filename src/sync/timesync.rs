//! Time-synchronization responder
//!
//! NTP-style round-trip exchange: the client stamps its send time, the
//! server stamps receipt and reply, and the client derives offset and RTT
//! with the standard formula. Both server stamps come from the monotonic
//! [`ServerClock`], so `server_processed_ms >= server_received_ms` holds
//! unconditionally.

use serde::Serialize;

use crate::clock::ServerClock;

/// Ack body for a `time_sync` exchange.
#[derive(Debug, Clone, Serialize)]
pub struct TimeSyncReply {
    /// Client send timestamp, echoed verbatim
    pub client_sent: u64,
    /// Server wall time at message receipt
    pub server_received_ms: u64,
    /// Server wall time just before the reply was queued
    pub server_processed_ms: u64,
    /// Milliseconds since server start
    pub server_uptime_ms: u64,
    /// Server timezone offset from UTC in minutes
    pub server_tz_offset_min: i32,
    /// Server wall time as RFC 3339
    pub server_iso: String,
}

/// Build the reply for a `time_sync` request received at `received_ms`.
#[must_use]
pub fn respond(clock: &ServerClock, client_sent: u64, received_ms: u64) -> TimeSyncReply {
    // Processed is stamped last; max() guards against a caller passing a
    // receipt stamp from a different clock instance.
    let processed_ms = clock.now_wall_ms().max(received_ms);
    TimeSyncReply {
        client_sent,
        server_received_ms: received_ms,
        server_processed_ms: processed_ms,
        server_uptime_ms: clock.uptime_ms(),
        server_tz_offset_min: clock.tz_offset_min(),
        server_iso: clock.iso_now(),
    }
}
