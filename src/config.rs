//! Server configuration

use std::time::Duration;

/// Tunables for the sync server.
///
/// Defaults match the deployed service; tests shrink the windows to keep
/// runtimes short.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address for the event socket
    pub listen_addr: String,

    /// Session lifetime with no authoritative playback change
    pub session_ttl: Duration,

    /// Lifetime of a pending controller request
    pub request_ttl: Duration,

    /// Average drift (seconds) above which the fast broadcast path engages
    pub drift_threshold_s: f64,

    /// Age beyond which a drift sample no longer informs broadcast decisions
    pub drift_window: Duration,

    /// Per-client ring size for drift samples
    pub drift_avg_window: usize,

    /// Retained manual-resync reports per client
    pub manual_resync_history: usize,

    /// Authoritative position samples averaged into broadcast positions
    pub position_smoothing_window: usize,

    /// Baseline playback broadcast interval
    pub base_tick: Duration,

    /// Fast-recovery broadcast interval
    pub high_drift_tick: Duration,

    /// Session expiry and pending-request sweep interval
    pub reaper_tick: Duration,

    /// Stale drift-sample eviction interval
    pub drift_sweep_tick: Duration,

    /// Chat messages allowed per connection per window
    pub chat_limit: usize,

    /// Chat rate-limit window
    pub chat_window: Duration,

    /// Retained chat messages per session; oldest dropped beyond this
    pub max_messages: usize,

    /// Per-connection send-queue high-watermark, in frames
    pub send_queue_capacity: usize,

    /// Maximum accepted frame length in bytes
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7340".to_string(),
            session_ttl: Duration::from_secs(60 * 60),
            request_ttl: Duration::from_secs(5 * 60),
            drift_threshold_s: 0.08,
            drift_window: Duration::from_secs(10),
            drift_avg_window: 8,
            manual_resync_history: 10,
            position_smoothing_window: 5,
            base_tick: Duration::from_millis(150),
            high_drift_tick: Duration::from_millis(60),
            reaper_tick: Duration::from_secs(1),
            drift_sweep_tick: Duration::from_secs(60),
            chat_limit: 5,
            chat_window: Duration::from_millis(3000),
            max_messages: 5000,
            send_queue_capacity: 256,
            max_frame_len: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Configuration with a specific listen address.
    #[must_use]
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            listen_addr: addr.into(),
            ..Self::default()
        }
    }
}
