//! The session record
//!
//! One [`Session`] owns everything a group of members shares: playback,
//! queue, member table, controller bookkeeping, chat, and drift samples.
//! A single lock guards the whole record; fan-out enqueues happen while it
//! is held, which is what gives every member the same event order.

use serde_json::Value;

use crate::config::ServerConfig;
use crate::router::event::{
    ClientEntry, RequestEntry, ServerEvent, SessionSnapshot, SyncStatePayload,
};
use crate::session::chat::ChatStore;
use crate::session::controller::ControllerArbiter;
use crate::session::members::MemberTable;
use crate::session::playback::PlaybackState;
use crate::session::queue::TrackQueue;
use crate::sync::drift::DriftBook;
use crate::types::{ClientId, ConnId, SessionId};

/// Duration to whole milliseconds, saturating.
pub(crate) fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// All shared state of one playback session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    /// Playback state machine
    pub(crate) playback: PlaybackState,
    /// Track queue
    pub(crate) queue: TrackQueue,
    /// Member table and controller pointers
    pub(crate) members: MemberTable,
    /// Pending controller requests and offers
    pub(crate) arbiter: ControllerArbiter,
    /// Chat log and reactions
    pub(crate) chat: ChatStore,
    /// Drift samples per member
    pub(crate) drift: DriftBook,
    /// Uninterpreted per-session settings, echoed in snapshots
    pub(crate) settings: serde_json::Map<String, Value>,
}

impl Session {
    /// Fresh session with empty queue and no members.
    #[must_use]
    pub fn new(id: SessionId, now_ms: u64, config: &ServerConfig) -> Self {
        Self {
            id,
            playback: PlaybackState::new(now_ms, config.position_smoothing_window),
            queue: TrackQueue::new(),
            members: MemberTable::new(),
            arbiter: ControllerArbiter::new(duration_ms(config.request_ttl)),
            chat: ChatStore::new(config.max_messages),
            drift: DriftBook::new(
                config.drift_avg_window,
                config.manual_resync_history,
                duration_ms(config.drift_window),
            ),
            settings: serde_json::Map::new(),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Playback state, read-only.
    #[must_use]
    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    /// Member table, read-only.
    #[must_use]
    pub fn members(&self) -> &MemberTable {
        &self.members
    }

    /// Expiry deadline given the session TTL.
    #[must_use]
    pub fn expires_at_ms(&self, ttl_ms: u64) -> u64 {
        self.playback.last_updated_ms().saturating_add(ttl_ms)
    }

    /// Serialize an event once and enqueue it to every member.
    pub fn broadcast(&self, event: &ServerEvent) {
        let frame = event.to_frame();
        for (_, member) in self.members.iter() {
            member.handle.send_frame(frame.clone());
        }
    }

    /// Like [`broadcast`](Self::broadcast) but skipping one connection.
    pub fn broadcast_except(&self, skip: ConnId, event: &ServerEvent) {
        let frame = event.to_frame();
        for (&conn_id, member) in self.members.iter() {
            if conn_id != skip {
                member.handle.send_frame(frame.clone());
            }
        }
    }

    /// Send an event to a single client, if connected. Returns whether it
    /// was enqueued.
    pub fn send_to_client(&self, client_id: &ClientId, event: &ServerEvent) -> bool {
        match self.members.get_by_client(client_id) {
            Some(member) => {
                member.handle.send_event(event);
                true
            }
            None => false,
        }
    }

    /// The `sync_state` payload as of `now_ms`.
    #[must_use]
    pub fn sync_state_payload(&self, now_ms: u64) -> SyncStatePayload {
        SyncStatePayload {
            is_playing: self.playback.is_playing(),
            timestamp_ms: self.playback.smoothed_position_ms(),
            last_updated_ms: self.playback.last_updated_ms(),
            controller_conn_id: self.members.controller_conn(),
            server_time_ms: now_ms,
            sync_version: self.playback.sync_version(),
        }
    }

    /// Full snapshot for `join_session` and `sync_request` acks.
    #[must_use]
    pub fn snapshot(&self, now_ms: u64) -> SessionSnapshot {
        SessionSnapshot {
            is_playing: self.playback.is_playing(),
            timestamp: self.playback.smoothed_position_ms(),
            last_updated: self.playback.last_updated_ms(),
            controller_conn_id: self.members.controller_conn(),
            controller_client_id: self.members.controller_client().cloned(),
            queue: self.queue.tracks().to_vec(),
            selected_idx: self.queue.selected_idx(),
            current_track: self.queue.current_track().cloned(),
            session_settings: self.settings.clone(),
            drift: self.drift.average_recent(now_ms),
            sync_version: self.playback.sync_version(),
        }
    }

    /// `clients_update` event for the current membership.
    #[must_use]
    pub fn clients_update_event(&self) -> ServerEvent {
        let controller_conn = self.members.controller_conn();
        ServerEvent::ClientsUpdate {
            clients: self
                .members
                .iter()
                .map(|(&conn_id, m)| ClientEntry {
                    conn_id,
                    client_id: m.client_id.clone(),
                    display_name: m.display_name.clone(),
                    device_info: m.device_info.clone(),
                    is_controller: Some(conn_id) == controller_conn,
                })
                .collect(),
        }
    }

    /// `controller_change` event for the current binding.
    #[must_use]
    pub fn controller_change_event(&self) -> ServerEvent {
        ServerEvent::ControllerChange {
            controller_conn_id: self.members.controller_conn(),
            controller_client_id: self.members.controller_client().cloned(),
        }
    }

    /// `controller_requests_update` event for the current pending set.
    #[must_use]
    pub fn requests_update_event(&self) -> ServerEvent {
        ServerEvent::ControllerRequestsUpdate {
            requests: self
                .arbiter
                .requests()
                .into_iter()
                .map(RequestEntry::from)
                .collect(),
        }
    }

    /// `queue_update` event for the current queue.
    #[must_use]
    pub fn queue_update_event(&self) -> ServerEvent {
        ServerEvent::QueueUpdate {
            queue: self.queue.tracks().to_vec(),
            selected_idx: self.queue.selected_idx(),
        }
    }

    /// Hand the controller role to `client_id`.
    ///
    /// Clears any pending request the new controller had filed and bumps
    /// the sync version (a transfer is an authoritative change). Returns
    /// the new controller connection, or `None` (no change) when the client
    /// is not connected.
    pub fn transfer_controller(&mut self, client_id: &ClientId) -> Option<ConnId> {
        let conn = self.members.set_controller(client_id)?;
        self.arbiter.clear_request(client_id);
        self.playback.bump_version();
        Some(conn)
    }

    /// Filenames of user-uploaded tracks currently queued; used for file
    /// cleanup when the session is destroyed.
    #[must_use]
    pub fn upload_filenames(&self) -> Vec<String> {
        self.queue
            .tracks()
            .iter()
            .filter_map(crate::types::Track::upload_filename)
            .collect()
    }
}
