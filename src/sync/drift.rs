//! Per-client drift accounting
//!
//! Clients report how far their rendered position sits from the expected
//! one. Reports land in a short per-client ring; the adaptive broadcaster
//! reads the cross-client average of the fresh samples. Manual resyncs are
//! kept separately for diagnostics.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::ClientId;

/// One drift report from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSample {
    /// Observed drift in seconds (absolute value is what matters)
    pub drift_s: f64,
    /// Client wall time of the observation
    pub wall_ms: u64,
    /// Whether the report came from a manual resync
    #[serde(default)]
    pub manual: bool,
    /// Drift before a manual resync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<f64>,
    /// Drift after a manual resync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<f64>,
    /// Improvement achieved by a manual resync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement: Option<f64>,
    /// Duration of the resync operation in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Ring state for one client.
#[derive(Debug, Default)]
struct ClientDrift {
    history: VecDeque<DriftSample>,
    manual_history: VecDeque<DriftSample>,
    last_report_wall_ms: u64,
}

/// Drift samples for every client of one session.
#[derive(Debug)]
pub struct DriftBook {
    clients: HashMap<ClientId, ClientDrift>,
    avg_window: usize,
    manual_cap: usize,
    window_ms: u64,
}

impl DriftBook {
    /// Book with the given ring size, manual-history cap, and freshness
    /// window.
    #[must_use]
    pub fn new(avg_window: usize, manual_cap: usize, window_ms: u64) -> Self {
        Self {
            clients: HashMap::new(),
            avg_window: avg_window.max(1),
            manual_cap: manual_cap.max(1),
            window_ms,
        }
    }

    /// Record a report.
    pub fn record(&mut self, client: ClientId, sample: DriftSample) {
        let entry = self.clients.entry(client).or_default();
        entry.last_report_wall_ms = sample.wall_ms;
        if sample.manual {
            if entry.manual_history.len() == self.manual_cap {
                entry.manual_history.pop_front();
            }
            entry.manual_history.push_back(sample.clone());
        }
        if entry.history.len() == self.avg_window {
            entry.history.pop_front();
        }
        entry.history.push_back(sample);
    }

    /// Forget a departed client entirely.
    pub fn remove_client(&mut self, client: &ClientId) {
        self.clients.remove(client);
    }

    /// Mean absolute drift over samples no older than the freshness
    /// window, across all clients. `None` when nothing fresh exists.
    #[must_use]
    pub fn average_recent(&self, now_ms: u64) -> Option<f64> {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let mut sum = 0.0;
        let mut count = 0usize;
        for entry in self.clients.values() {
            for sample in entry.history.iter().filter(|s| s.wall_ms >= cutoff) {
                sum += sample.drift_s.abs();
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss, reason = "Sample counts are tiny")]
            let mean = sum / count as f64;
            Some(mean)
        }
    }

    /// Whether any client has reported within the freshness window.
    #[must_use]
    pub fn any_recent(&self, now_ms: u64) -> bool {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.clients
            .values()
            .any(|e| e.last_report_wall_ms >= cutoff)
    }

    /// Evict samples older than the freshness window. Manual history is
    /// diagnostics and survives the sweep.
    pub fn sweep(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        for entry in self.clients.values_mut() {
            entry.history.retain(|s| s.wall_ms >= cutoff);
        }
    }

    /// Number of clients with any recorded state.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
