//! Adaptive playback broadcaster
//!
//! Two independent tickers fan out `sync_state` snapshots. The base tick
//! keeps well-behaved sessions converging at a modest rate; the high-drift
//! tick takes over when members disagree or have gone quiet, trading
//! traffic for recovery speed. Broadcasts are read-only snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::clock::ServerClock;
use crate::config::ServerConfig;
use crate::router::event::ServerEvent;
use crate::session::registry::SessionRegistry;
use crate::types::SessionId;

/// Minimum gap between controller-lag warnings per session.
const LAG_WARN_INTERVAL_MS: u64 = 10_000;
/// Playing sessions whose state is older than this draw a warning.
const LAG_THRESHOLD_MS: u64 = 1_000;

/// Periodic `sync_state` fan-out driven by observed drift.
pub struct AdaptiveBroadcaster {
    registry: Arc<SessionRegistry>,
    clock: ServerClock,
    config: ServerConfig,
}

impl AdaptiveBroadcaster {
    /// Broadcaster over the given registry.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, clock: ServerClock, config: ServerConfig) -> Self {
        Self {
            registry,
            clock,
            config,
        }
    }

    /// One pass of the base tick: sessions whose average recent drift is
    /// below the threshold get a snapshot.
    pub async fn run_base_pass(&self, lag_warned: &mut HashMap<SessionId, u64>) {
        let now = self.clock.now_wall_ms();
        for handle in self.registry.all().await {
            let session = handle.state.lock().await;
            if session.members.is_empty() {
                continue;
            }

            // Controller-device lag heuristic.
            if session.playback.is_playing() {
                let age = now.saturating_sub(session.playback.last_updated_ms());
                if age > LAG_THRESHOLD_MS {
                    let last = lag_warned.get(session.id()).copied().unwrap_or(0);
                    if now.saturating_sub(last) >= LAG_WARN_INTERVAL_MS {
                        lag_warned.insert(session.id().clone(), now);
                        tracing::warn!(
                            session = %session.id(),
                            age_ms = age,
                            "playback state is stale while playing; controller device may be lagging"
                        );
                    }
                }
            }

            let below = session
                .drift
                .average_recent(now)
                .is_some_and(|avg| avg < self.config.drift_threshold_s);
            if below {
                let payload = session.sync_state_payload(now);
                session.broadcast(&ServerEvent::SyncState(payload));
            }
        }
    }

    /// One pass of the high-drift tick: sessions above the threshold, or
    /// with no fresh drift sample at all, get a snapshot.
    pub async fn run_high_drift_pass(&self) {
        let now = self.clock.now_wall_ms();
        for handle in self.registry.all().await {
            let session = handle.state.lock().await;
            if session.members.is_empty() {
                continue;
            }
            let above = session
                .drift
                .average_recent(now)
                .is_some_and(|avg| avg > self.config.drift_threshold_s);
            let stale = !session.drift.any_recent(now);
            if above || stale {
                let payload = session.sync_state_payload(now);
                session.broadcast(&ServerEvent::SyncState(payload));
            }
        }
    }

    /// One pass of the drift sweeper: evict samples past the freshness
    /// window.
    pub async fn run_drift_sweep_pass(&self) {
        let now = self.clock.now_wall_ms();
        for handle in self.registry.all().await {
            let mut session = handle.state.lock().await;
            session.drift.sweep(now);
        }
    }

    /// Spawn the base ticker. The task ends when the broadcaster is
    /// dropped.
    #[must_use]
    pub fn spawn_base(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let tick = self.config.base_tick;
        tokio::spawn(async move {
            let mut ticker = interval(tick);
            let mut lag_warned = HashMap::new();
            loop {
                ticker.tick().await;
                let Some(broadcaster) = weak.upgrade() else {
                    break;
                };
                broadcaster.run_base_pass(&mut lag_warned).await;
            }
        })
    }

    /// Spawn the high-drift ticker.
    #[must_use]
    pub fn spawn_high_drift(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let tick = self.config.high_drift_tick;
        tokio::spawn(async move {
            let mut ticker = interval(tick);
            loop {
                ticker.tick().await;
                let Some(broadcaster) = weak.upgrade() else {
                    break;
                };
                broadcaster.run_high_drift_pass().await;
            }
        })
    }

    /// Spawn the drift-sample sweeper.
    #[must_use]
    pub fn spawn_drift_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let tick = self.config.drift_sweep_tick;
        tokio::spawn(async move {
            let mut ticker = interval(tick);
            loop {
                ticker.tick().await;
                let Some(broadcaster) = weak.upgrade() else {
                    break;
                };
                broadcaster.run_drift_sweep_pass().await;
            }
        })
    }
}
