//! Session registry
//!
//! Owns every live session record and the expiry index. Lookups take the
//! map read lock; create and delete take the write lock. The heap sits
//! behind its own short mutex so `touch` never contends with lookups.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use rand::Rng;
use tokio::sync::{Mutex, RwLock};

use crate::config::ServerConfig;
use crate::session::expiry::ExpiryHeap;
use crate::session::record::{Session, duration_ms};
use crate::types::SessionId;

/// Adjective pool for generated session ids.
const ID_ADJECTIVES: &[&str] = &[
    "amber", "blue", "bold", "bright", "calm", "coral", "crimson", "deep", "early", "gentle",
    "golden", "green", "hidden", "late", "lunar", "mellow", "misty", "quiet", "rapid", "silver",
    "solar", "still", "violet", "wild",
];

/// Noun pool for generated session ids.
const ID_NOUNS: &[&str] = &[
    "beacon", "bridge", "canyon", "cloud", "comet", "dawn", "echo", "ember", "field", "forest",
    "harbor", "island", "meadow", "moon", "peak", "pine", "reef", "river", "shore", "sky",
    "star", "stone", "tide", "wave",
];

/// A session record behind its lock.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session id (also the registry key)
    pub id: SessionId,
    /// The guarded record
    pub state: Mutex<Session>,
}

/// Registry of live sessions plus the expiry index.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<std::collections::HashMap<SessionId, Arc<SessionHandle>>>,
    expiry: StdMutex<ExpiryHeap>,
    ttl_ms: u64,
    config: ServerConfig,
}

impl SessionRegistry {
    /// Empty registry with the configured TTL.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            sessions: RwLock::new(std::collections::HashMap::new()),
            expiry: StdMutex::new(ExpiryHeap::new()),
            ttl_ms: duration_ms(config.session_ttl),
            config,
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Look up a session.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Every live session, in no particular order.
    pub async fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Fetch a session, creating it if absent.
    ///
    /// Returns the handle and whether this call created it. Idempotent
    /// under races: the loser of a create race gets the winner's session.
    pub async fn get_or_create(&self, id: &SessionId, now_ms: u64) -> (Arc<SessionHandle>, bool) {
        if let Some(existing) = self.get(id).await {
            return (existing, false);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(id) {
            return (Arc::clone(existing), false);
        }

        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            state: Mutex::new(Session::new(id.clone(), now_ms, &self.config)),
        });
        sessions.insert(id.clone(), Arc::clone(&handle));
        drop(sessions);

        if let Ok(mut heap) = self.expiry.lock() {
            heap.upsert(id.clone(), now_ms.saturating_add(self.ttl_ms));
        }
        tracing::info!(session = %id, "session created");
        (handle, true)
    }

    /// Move a session's expiry deadline after an authoritative playback
    /// change.
    pub fn touch(&self, id: &SessionId, last_updated_ms: u64) {
        if let Ok(mut heap) = self.expiry.lock() {
            heap.upsert(id.clone(), last_updated_ms.saturating_add(self.ttl_ms));
        }
    }

    /// Remove a session from the registry and the expiry index.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            if let Ok(mut heap) = self.expiry.lock() {
                heap.remove(id);
            }
            tracing::info!(session = %id, "session removed");
        }
        removed
    }

    /// Pop and detach every session whose deadline passed.
    ///
    /// The returned handles are already out of the registry; the caller
    /// notifies members and runs file cleanup.
    pub async fn reap_due(&self, now_ms: u64) -> Vec<Arc<SessionHandle>> {
        let due = match self.expiry.lock() {
            Ok(mut heap) => heap.pop_due(now_ms),
            Err(_) => Vec::new(),
        };
        if due.is_empty() {
            return Vec::new();
        }

        let mut sessions = self.sessions.write().await;
        due.iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }

    /// Generate an unused session id of the form `adj-noun-NN`.
    ///
    /// Draws without replacement against live ids; falls back to widening
    /// the numeric range only if the pool is somehow exhausted.
    pub async fn generate_id(&self) -> SessionId {
        let live: HashSet<SessionId> = self.sessions.read().await.keys().cloned().collect();
        let mut rng = rand::thread_rng();

        for _ in 0..256 {
            let adj = ID_ADJECTIVES[rng.gen_range(0..ID_ADJECTIVES.len())];
            let noun = ID_NOUNS[rng.gen_range(0..ID_NOUNS.len())];
            let nn: u32 = rng.gen_range(10..90);
            let candidate = format!("{adj}-{noun}-{nn}");
            if let Ok(id) = SessionId::parse(candidate) {
                if !live.contains(&id) {
                    return id;
                }
            }
        }

        // 46k combinations exhausted or astronomically unlucky; fall back
        // to a wide numeric draw.
        loop {
            let wide: u64 = rng.gen_range(100_000..1_000_000);
            if let Ok(id) = SessionId::parse(format!("session-{wide}")) {
                if !live.contains(&id) {
                    return id;
                }
            }
        }
    }
}
