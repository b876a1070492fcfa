//! The sync server
//!
//! Owns the listener, the registry, the router, and the background tasks
//! (expiry reaper, adaptive broadcaster ticks, drift sweeper). One task is
//! spawned per accepted connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::clock::ServerClock;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::library::{FileCleanup, NoCleanup, NoSamples, SampleLibrary};
use crate::router::event::ServerEvent;
use crate::router::handler::EventRouter;
use crate::session::registry::SessionRegistry;
use crate::sync::broadcaster::AdaptiveBroadcaster;
use crate::transport::connection::{StatsSnapshot, TransportStats, run_connection};
use crate::types::ConnId;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not running
    Stopped,
    /// Binding and spawning tasks
    Starting,
    /// Accepting connections
    Running,
    /// Shutting down
    Stopping,
}

/// Synchronized-playback server core.
pub struct SyncServer {
    config: ServerConfig,
    clock: ServerClock,
    registry: Arc<SessionRegistry>,
    router: Arc<EventRouter>,
    broadcaster: Arc<AdaptiveBroadcaster>,
    cleanup: Arc<dyn FileCleanup>,
    stats: Arc<TransportStats>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    next_conn_id: Arc<AtomicU64>,
}

impl SyncServer {
    /// Server with explicit collaborators.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        library: Arc<dyn SampleLibrary>,
        cleanup: Arc<dyn FileCleanup>,
    ) -> Self {
        let clock = ServerClock::new();
        let registry = Arc::new(SessionRegistry::new(config.clone()));
        let stats = Arc::new(TransportStats::default());
        let router = Arc::new(EventRouter::new(
            Arc::clone(&registry),
            clock.clone(),
            config.clone(),
            library,
            Arc::clone(&cleanup),
            Arc::clone(&stats),
        ));
        let broadcaster = Arc::new(AdaptiveBroadcaster::new(
            Arc::clone(&registry),
            clock.clone(),
            config.clone(),
        ));

        Self {
            config,
            clock,
            registry,
            router,
            broadcaster,
            cleanup,
            stats,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown_tx: None,
            tasks: Vec::new(),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Server with no sample library and no file cleanup.
    #[must_use]
    pub fn with_defaults(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(NoSamples), Arc::new(NoCleanup))
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Session registry handle.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Transport counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address (useful with a `:0` listen port).
    ///
    /// # Errors
    /// `AlreadyRunning` when called twice, `Bind` when the address is
    /// unavailable.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                return Err(ServerError::AlreadyRunning);
            }
            *state = ServerState::Starting;
        }

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: self.config.listen_addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        // Background tasks.
        self.tasks.push(self.broadcaster.spawn_base());
        self.tasks.push(self.broadcaster.spawn_high_drift());
        self.tasks.push(self.broadcaster.spawn_drift_sweeper());
        self.tasks.push(self.spawn_reaper());

        *self.state.write().await = ServerState::Running;
        tracing::info!(addr = %local_addr, "sync server listening");

        let router = Arc::clone(&self.router);
        let stats = Arc::clone(&self.stats);
        let state = Arc::clone(&self.state);
        let counter = Arc::clone(&self.next_conn_id);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let conn_id = ConnId(counter.fetch_add(1, Ordering::Relaxed));
                                tracing::debug!(conn = %conn_id, %peer, "connection accepted");
                                let router = Arc::clone(&router);
                                let stats = Arc::clone(&stats);
                                tokio::spawn(async move {
                                    run_connection(stream, conn_id, router, stats).await;
                                    tracing::debug!(conn = %conn_id, "connection closed");
                                });
                            }
                            Err(e) => {
                                tracing::error!("accept error: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            *state.write().await = ServerState::Stopped;
            tracing::info!("sync server stopped");
        });

        Ok(local_addr)
    }

    /// Stop accepting connections and cancel background tasks.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            *self.state.write().await = ServerState::Stopping;
            let _ = tx.send(()).await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Spawn the once-per-second reaper: expired sessions are closed and
    /// expired controller requests swept.
    fn spawn_reaper(&self) -> JoinHandle<()> {
        spawn_reaper_task(
            Arc::downgrade(&self.registry),
            Arc::clone(&self.cleanup),
            self.clock.clone(),
            self.config.reaper_tick,
        )
    }
}

/// Spawn the reaper ticker over a registry. The task ends when the
/// registry is dropped.
pub(crate) fn spawn_reaper_task(
    registry: Weak<SessionRegistry>,
    cleanup: Arc<dyn FileCleanup>,
    clock: ServerClock,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tick);
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            reaper_pass(&registry, &cleanup, clock.now_wall_ms()).await;
        }
    })
}

/// One reaper pass: close expired sessions and sweep stale controller
/// requests.
pub(crate) async fn reaper_pass(
    registry: &SessionRegistry,
    cleanup: &Arc<dyn FileCleanup>,
    now_ms: u64,
) {
    for handle in registry.reap_due(now_ms).await {
        let session = handle.state.lock().await;
        let uploads = session.upload_filenames();
        tracing::info!(session = %session.id(), members = session.members().len(),
            "session expired");
        session.broadcast(&ServerEvent::SessionClosed {
            session_id: session.id().clone(),
            reason: "Session expired due to inactivity".to_string(),
        });
        // Members are cut loose; their disconnect path no-ops against the
        // already-detached record.
        for (_, member) in session.members().iter() {
            member.handle.signal_shutdown();
        }
        drop(session);

        for filename in uploads {
            cleanup.remove_upload(&filename).await;
        }
    }

    for handle in registry.all().await {
        let mut session = handle.state.lock().await;
        let expired = session.arbiter.sweep_expired(now_ms);
        if !expired.is_empty() {
            tracing::debug!(session = %session.id(), count = expired.len(),
                "expired controller requests swept");
            session.broadcast(&session.requests_update_event());
        }
    }
}
