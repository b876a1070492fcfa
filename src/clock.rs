//! Server clock
//!
//! All server-side timestamps derive from a wall-clock epoch captured at
//! startup plus a monotonic [`Instant`], so two readings taken in sequence
//! never go backwards even if the system clock steps.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Offset, SecondsFormat, Utc};

/// Monotonic wall-clock source shared by every component that stamps events.
#[derive(Debug, Clone)]
pub struct ServerClock {
    /// Wall-clock milliseconds at the moment the clock was created
    epoch_wall_ms: u64,
    /// Monotonic reference taken at the same moment
    started: Instant,
}

impl ServerClock {
    /// Create a clock anchored to the current system time.
    #[must_use]
    pub fn new() -> Self {
        let epoch_wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(0));

        Self {
            epoch_wall_ms,
            started: Instant::now(),
        }
    }

    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Monotonic: successive readings never decrease.
    #[must_use]
    pub fn now_wall_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_wall_ms.saturating_add(elapsed)
    }

    /// Milliseconds since the clock was created.
    #[must_use]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Current time rendered as an RFC 3339 string with millisecond precision.
    #[must_use]
    pub fn iso_now(&self) -> String {
        let ms = self.now_wall_ms();
        DateTime::<Utc>::from_timestamp_millis(i64::try_from(ms).unwrap_or(0))
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Local timezone offset from UTC in minutes.
    #[must_use]
    pub fn tz_offset_min(&self) -> i32 {
        Local::now().offset().fix().local_minus_utc() / 60
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}
