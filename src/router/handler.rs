//! Inbound event dispatch
//!
//! Every frame goes through the same path: parse the payload into its
//! typed shape, authorize against the session's member and controller
//! state, mutate under the session lock, and enqueue fan-out while still
//! holding it. Failures become ack errors; they never tear the connection
//! down.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clock::ServerClock;
use crate::config::ServerConfig;
use crate::error::EventError;
use crate::library::{FileCleanup, SampleLibrary};
use crate::router::event::{
    AddToQueuePayload, ChatDeletePayload, ChatEditPayload, ChatSendPayload, DriftReportPayload,
    Envelope, JoinSessionPayload, OffererRefPayload, PlaybackCmdPayload, ReactionPayload,
    RemoveFromQueuePayload, RequesterRefPayload, ServerEvent, SessionRefPayload,
    TargetRefPayload, TimeSyncPayload, TrackChangePayload, ack_frame,
};
use crate::router::rate_limit::ChatRateLimiter;
use crate::router::sanitize;
use crate::router::signaling;
use crate::session::members::MemberInfo;
use crate::session::queue::SelectionChange;
use crate::session::registry::{SessionHandle, SessionRegistry};
use crate::sync::drift::DriftSample;
use crate::sync::timesync;
use crate::transport::connection::{ConnHandle, TransportStats};
use crate::types::{ChatMessage, ClientId, ConnId, SessionId, Track};

/// Per-connection routing state, owned by the connection's reader task.
#[derive(Debug)]
pub struct ConnCtx {
    handle: ConnHandle,
    session: Option<Arc<SessionHandle>>,
    client_id: Option<ClientId>,
    limiter: ChatRateLimiter,
}

impl ConnCtx {
    /// Context for a fresh connection.
    #[must_use]
    pub fn new(handle: ConnHandle, config: &ServerConfig) -> Self {
        Self {
            handle,
            session: None,
            client_id: None,
            limiter: ChatRateLimiter::new(
                config.chat_limit,
                crate::session::record::duration_ms(config.chat_window),
            ),
        }
    }

    /// Connection id.
    #[must_use]
    pub fn conn_id(&self) -> ConnId {
        self.handle.id()
    }

    /// Session this connection is bound to, if joined.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<SessionHandle>> {
        self.session.as_ref()
    }

    /// Client identity established at join.
    #[must_use]
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }
}

/// Which playback transition a frame asked for.
#[derive(Debug, Clone, Copy)]
enum PlaybackAction {
    Play,
    Pause,
    Seek,
}

/// Validates, authorizes, and dispatches every inbound event.
pub struct EventRouter {
    registry: Arc<SessionRegistry>,
    clock: ServerClock,
    config: ServerConfig,
    library: Arc<dyn SampleLibrary>,
    cleanup: Arc<dyn FileCleanup>,
    stats: Arc<TransportStats>,
}

impl EventRouter {
    /// Router over the given registry and collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        clock: ServerClock,
        config: ServerConfig,
        library: Arc<dyn SampleLibrary>,
        cleanup: Arc<dyn FileCleanup>,
        stats: Arc<TransportStats>,
    ) -> Self {
        Self {
            registry,
            clock,
            config,
            library,
            cleanup,
            stats,
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Server clock.
    #[must_use]
    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    /// Session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// File-cleanup collaborator.
    #[must_use]
    pub fn cleanup(&self) -> &Arc<dyn FileCleanup> {
        &self.cleanup
    }

    /// Dispatch one inbound frame. Returns the ack frame to send back, if
    /// the client asked for one.
    pub async fn dispatch(
        &self,
        ctx: &mut ConnCtx,
        envelope: Envelope,
        received_ms: u64,
    ) -> Option<String> {
        let Envelope {
            event,
            payload,
            ack,
        } = envelope;

        let result = self.route(ctx, &event, payload, received_ms).await;

        match (result, ack) {
            (Ok(body), Some(id)) => {
                let mut object = match body {
                    Value::Object(map) => map,
                    other => {
                        let mut map = serde_json::Map::new();
                        if !other.is_null() {
                            map.insert("result".to_string(), other);
                        }
                        map
                    }
                };
                object.entry("success").or_insert(Value::Bool(true));
                Some(ack_frame(id, Value::Object(object)))
            }
            (Ok(_), None) => None,
            (Err(e), Some(id)) => {
                tracing::debug!(conn = %ctx.conn_id(), %event, code = e.code(), "event rejected: {e}");
                Some(ack_frame(id, serde_json::json!({ "error": e.to_string() })))
            }
            (Err(e), None) => {
                tracing::debug!(conn = %ctx.conn_id(), %event, code = e.code(), "event rejected without ack: {e}");
                None
            }
        }
    }

    async fn route(
        &self,
        ctx: &mut ConnCtx,
        event: &str,
        payload: Value,
        received_ms: u64,
    ) -> Result<Value, EventError> {
        match event {
            "join_session" => self.handle_join(ctx, parse(payload)?).await,
            "leave_session" => self.handle_leave(ctx).await,
            "play" => {
                self.handle_playback(ctx, PlaybackAction::Play, parse(payload)?)
                    .await
            }
            "pause" => {
                self.handle_playback(ctx, PlaybackAction::Pause, parse(payload)?)
                    .await
            }
            "seek" => {
                self.handle_playback(ctx, PlaybackAction::Seek, parse(payload)?)
                    .await
            }
            "track_change" => self.handle_track_change(ctx, parse(payload)?).await,
            "add_to_queue" => self.handle_add_to_queue(ctx, parse(payload)?).await,
            "remove_from_queue" => self.handle_remove_from_queue(ctx, parse(payload)?).await,
            "request_controller" => self.handle_request_controller(ctx, parse(payload)?).await,
            "cancel_controller_request" => {
                self.handle_cancel_request(ctx, parse(payload)?).await
            }
            "approve_controller_request" => {
                self.handle_approve_request(ctx, parse(payload)?).await
            }
            "deny_controller_request" => self.handle_deny_request(ctx, parse(payload)?).await,
            "offer_controller" => self.handle_offer_controller(ctx, parse(payload)?).await,
            "accept_controller_offer" => self.handle_accept_offer(ctx, parse(payload)?).await,
            "decline_controller_offer" => self.handle_decline_offer(ctx, parse(payload)?).await,
            "chat_message" => self.handle_chat_message(ctx, parse(payload)?).await,
            "edit_message" => self.handle_edit_message(ctx, parse(payload)?).await,
            "delete_message" => self.handle_delete_message(ctx, parse(payload)?).await,
            "emoji_reaction" => self.handle_reaction(ctx, parse(payload)?, true).await,
            "remove_emoji_reaction" => self.handle_reaction(ctx, parse(payload)?, false).await,
            "typing" => self.handle_typing(ctx, parse(payload)?, true).await,
            "stop_typing" => self.handle_typing(ctx, parse(payload)?, false).await,
            "time_sync" => self.handle_time_sync(parse(payload)?, received_ms),
            "drift_report" => self.handle_drift_report(ctx, parse(payload)?).await,
            "sync_request" => self.handle_sync_request(ctx, parse(payload)?).await,
            "peer-offer" | "peer-answer" | "peer-ice-candidate" => {
                signaling::relay(ctx, event, payload).await
            }
            _ => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                Err(EventError::InvalidArgument(format!(
                    "Unknown event type: {event}"
                )))
            }
        }
    }

    // -- join / leave -------------------------------------------------------

    async fn handle_join(
        &self,
        ctx: &mut ConnCtx,
        p: JoinSessionPayload,
    ) -> Result<Value, EventError> {
        let session_id = parse_session_id(&p.session_id)?;
        let client_id = parse_client_id(&p.client_id)?;
        let display_name = sanitize::sanitize_display_name(p.display_name.as_deref())?
            .unwrap_or_else(|| client_id.to_string());

        // A connection is bound to at most one session.
        self.detach(ctx).await;

        let now = self.clock.now_wall_ms();
        let (handle, created) = self.registry.get_or_create(&session_id, now).await;

        // Seed tracks are fetched outside the session lock.
        let seeds = if created {
            self.library.seed_tracks().await
        } else {
            Vec::new()
        };

        let mut session = handle.state.lock().await;

        if created && session.queue.is_empty() {
            for track in seeds {
                if let Err(e) = session.queue.add(track) {
                    tracing::warn!(session = %session_id, "skipping seed track: {e}");
                }
            }
        }

        let outcome = session.members.join(
            ctx.conn_id(),
            MemberInfo {
                client_id: client_id.clone(),
                display_name,
                device_info: p.device_info,
                handle: ctx.handle.clone(),
            },
        );
        if let Some(evicted) = outcome.evicted {
            tracing::info!(session = %session_id, client = %client_id,
                "client reconnected, evicting previous connection");
            evicted.signal_shutdown();
        }

        // The joiner gets the queue, reaction aggregates, and chat backlog
        // directly; everyone (joiner included) sees the membership change.
        ctx.handle.send_event(&session.queue_update_event());
        for (&message_id, reactions) in session.chat.all_reactions() {
            ctx.handle.send_event(&ServerEvent::MessageReactionsUpdated {
                message_id,
                reactions: reactions.clone(),
            });
        }
        if !session.chat.is_empty() {
            ctx.handle.send_event(&ServerEvent::ChatHistory {
                messages: session.chat.messages().cloned().collect(),
            });
        }

        session.broadcast(&session.clients_update_event());
        if outcome.controller_changed {
            session.broadcast(&session.controller_change_event());
        }

        let snapshot = session.snapshot(now);
        drop(session);

        ctx.session = Some(handle);
        ctx.client_id = Some(client_id);

        serde_json::to_value(snapshot)
            .map_err(|e| EventError::Transient(format!("snapshot encode failed: {e}")))
    }

    async fn handle_leave(&self, ctx: &mut ConnCtx) -> Result<Value, EventError> {
        self.detach(ctx).await;
        Ok(empty_object())
    }

    /// Run the disconnect path for a closing connection.
    pub async fn handle_disconnect(&self, ctx: &mut ConnCtx) {
        self.detach(ctx).await;
    }

    /// Unbind the connection from its session, if any, applying the
    /// departure rules: drop drift state and pending requests, re-point or
    /// clear the controller binding, destroy the session when it empties.
    async fn detach(&self, ctx: &mut ConnCtx) {
        let Some(handle) = ctx.session.take() else {
            return;
        };
        let client_id = ctx.client_id.take();
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        let outcome = session.members.leave(ctx.conn_id());
        if outcome.removed.is_none() {
            // Already evicted by a reconnect; nothing to announce.
            return;
        }

        if let Some(client) = &client_id {
            session.drift.remove_client(client);
            if session.arbiter.clear_request(client) {
                session.broadcast(&session.requests_update_event());
            }
        }

        if session.members.is_empty() {
            let uploads = session.upload_filenames();
            let session_id = session.id().clone();
            drop(session);
            self.registry.remove(&session_id).await;
            for filename in uploads {
                self.cleanup.remove_upload(&filename).await;
            }
            return;
        }

        if outcome.controller_changed {
            session.playback.bump_version();
            session.broadcast(&session.controller_change_event());
            let payload = session.sync_state_payload(now);
            session.broadcast(&ServerEvent::SyncState(payload));
        }
        session.broadcast(&session.clients_update_event());
    }

    // -- playback -----------------------------------------------------------

    async fn handle_playback(
        &self,
        ctx: &mut ConnCtx,
        action: PlaybackAction,
        p: PlaybackCmdPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let position_ms = parse_position_ms(p.timestamp)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        if !session.members.is_controller_conn(ctx.conn_id()) {
            // Non-controller playback input is dropped, not an error.
            tracing::debug!(conn = %ctx.conn_id(), "playback input from non-controller dropped");
            return Ok(empty_object());
        }

        let position_ms = if session.queue.is_empty() { 0 } else { position_ms };
        match action {
            PlaybackAction::Play => session.playback.play(position_ms, now),
            PlaybackAction::Pause => session.playback.pause(position_ms, now),
            PlaybackAction::Seek => session.playback.seek(position_ms, now),
        }

        let payload = session.sync_state_payload(now);
        session.broadcast(&ServerEvent::SyncState(payload));

        let session_id = session.id().clone();
        let last_updated = session.playback.last_updated_ms();
        drop(session);

        self.registry.touch(&session_id, last_updated);
        Ok(empty_object())
    }

    async fn handle_track_change(
        &self,
        ctx: &mut ConnCtx,
        p: TrackChangePayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        if !session.members.is_controller_conn(ctx.conn_id()) {
            tracing::debug!(conn = %ctx.conn_id(), "track_change from non-controller dropped");
            return Ok(empty_object());
        }

        let requested_idx = match (&p.track, p.idx) {
            (Some(incoming), _) => {
                let url = incoming.url.trim();
                if url.is_empty() {
                    return Err(EventError::InvalidArgument(
                        "Track URL is required".to_string(),
                    ));
                }
                match session.queue.index_of_url(url) {
                    Some(existing) => Some(existing),
                    None => {
                        let title = sanitize::sanitize_title(
                            incoming.title.as_deref().unwrap_or_default(),
                        );
                        let track = Track::new(url, title)
                            .with_metadata(incoming.metadata.clone().unwrap_or_default());
                        Some(session.queue.add(track)?.idx)
                    }
                }
            }
            (None, Some(idx)) => {
                let idx = usize::try_from(idx).map_err(|_| {
                    EventError::InvalidArgument("Track index must be non-negative".to_string())
                })?;
                Some(idx)
            }
            (None, None) => {
                return Err(EventError::InvalidArgument(
                    "Either idx or track is required".to_string(),
                ));
            }
        };

        let selected = requested_idx.and_then(|idx| session.queue.select(idx));
        session.playback.reset_position(now);

        let current = session.queue.current_track().cloned();
        session.broadcast(&ServerEvent::TrackChange {
            idx: selected,
            track: if selected.is_some() { current } else { None },
            reason: "track_selected".to_string(),
        });
        session.broadcast(&session.queue_update_event());
        let payload = session.sync_state_payload(now);
        session.broadcast(&ServerEvent::SyncState(payload));

        let session_id = session.id().clone();
        let last_updated = session.playback.last_updated_ms();
        drop(session);

        self.registry.touch(&session_id, last_updated);
        Ok(empty_object())
    }

    // -- queue --------------------------------------------------------------

    async fn handle_add_to_queue(
        &self,
        ctx: &mut ConnCtx,
        p: AddToQueuePayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let url = p.url.trim().to_string();
        if url.is_empty() {
            return Err(EventError::InvalidArgument(
                "Track URL is required".to_string(),
            ));
        }
        let title = sanitize::sanitize_title(p.title.as_deref().unwrap_or_default());
        let track = Track::new(url, title).with_metadata(p.metadata.unwrap_or_default());
        let track_id = track.id;

        let mut session = handle.state.lock().await;
        let added = session.queue.add(track)?;
        session.broadcast(&session.queue_update_event());

        if added.first_track {
            session.queue.select(0);
            let current = session.queue.current_track().cloned();
            session.broadcast(&ServerEvent::TrackChange {
                idx: Some(0),
                track: current,
                reason: "first_track_added".to_string(),
            });
        }

        Ok(serde_json::json!({ "track_id": track_id, "idx": added.idx }))
    }

    async fn handle_remove_from_queue(
        &self,
        ctx: &mut ConnCtx,
        p: RemoveFromQueuePayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        if !session.members.is_controller_conn(ctx.conn_id()) {
            return Err(EventError::Unauthorized(
                "Only the controller can remove tracks".to_string(),
            ));
        }

        let idx = match (p.index, p.track_id) {
            (Some(index), _) => usize::try_from(index).map_err(|_| {
                EventError::InvalidArgument("Queue index must be non-negative".to_string())
            })?,
            (None, Some(track_id)) => session
                .queue
                .index_of_id(track_id)
                .ok_or_else(|| EventError::NotFound("Track not found".to_string()))?,
            (None, None) => {
                return Err(EventError::InvalidArgument(
                    "Either index or track_id is required".to_string(),
                ));
            }
        };

        let removed = session.queue.remove(idx)?;
        session.broadcast(&session.queue_update_event());

        let mut touched = false;
        match removed.selection {
            SelectionChange::NowEmpty => {
                session.playback.reset_position(now);
                touched = true;
                session.broadcast(&ServerEvent::TrackChange {
                    idx: None,
                    track: None,
                    reason: "track_removed_queue_empty".to_string(),
                });
            }
            SelectionChange::CurrentRemoved(new_idx) => {
                session.playback.reset_position(now);
                touched = true;
                let current = session.queue.current_track().cloned();
                session.broadcast(&ServerEvent::TrackChange {
                    idx: Some(new_idx),
                    track: current,
                    reason: "current_track_removed".to_string(),
                });
            }
            SelectionChange::Shifted | SelectionChange::Unchanged => {}
        }

        let session_id = session.id().clone();
        let last_updated = session.playback.last_updated_ms();
        drop(session);

        if touched {
            self.registry.touch(&session_id, last_updated);
        }
        if let Some(filename) = removed.track.upload_filename() {
            self.cleanup.remove_upload(&filename).await;
        }
        Ok(empty_object())
    }

    // -- controller ---------------------------------------------------------

    async fn handle_request_controller(
        &self,
        ctx: &mut ConnCtx,
        p: SessionRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        if session.members.controller_client() == Some(&client_id) {
            return Err(EventError::Conflict(
                "You are already the controller".to_string(),
            ));
        }
        let requester_name = member_display_name(&session, ctx.conn_id())?;
        session
            .arbiter
            .add_request(client_id.clone(), requester_name.clone(), now)?;

        session.broadcast(&session.requests_update_event());
        if let Some(controller) = session.members.controller_client().cloned() {
            session.send_to_client(
                &controller,
                &ServerEvent::ControllerRequestReceived {
                    client_id,
                    requester_name,
                },
            );
        }
        Ok(empty_object())
    }

    async fn handle_cancel_request(
        &self,
        ctx: &mut ConnCtx,
        p: SessionRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;

        let mut session = handle.state.lock().await;
        session.arbiter.cancel_request(&client_id)?;
        session.broadcast(&session.requests_update_event());
        Ok(empty_object())
    }

    async fn handle_approve_request(
        &self,
        ctx: &mut ConnCtx,
        p: RequesterRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let requester = parse_client_id(&p.requester_client_id)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        if !session.members.is_controller_conn(ctx.conn_id()) {
            return Err(EventError::Unauthorized(
                "Only the controller can approve requests".to_string(),
            ));
        }
        session.arbiter.take_request(&requester, now)?;
        if session.transfer_controller(&requester).is_none() {
            return Err(EventError::NotFound(
                "Requester is no longer in the session".to_string(),
            ));
        }

        session.broadcast(&session.controller_change_event());
        session.broadcast(&ServerEvent::ControllerClientChange {
            controller_client_id: Some(requester),
        });
        session.broadcast(&session.requests_update_event());
        let payload = session.sync_state_payload(now);
        session.broadcast(&ServerEvent::SyncState(payload));
        Ok(empty_object())
    }

    async fn handle_deny_request(
        &self,
        ctx: &mut ConnCtx,
        p: RequesterRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let requester = parse_client_id(&p.requester_client_id)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        if !session.members.is_controller_conn(ctx.conn_id()) {
            return Err(EventError::Unauthorized(
                "Only the controller can deny requests".to_string(),
            ));
        }
        session.arbiter.take_request(&requester, now)?;
        session.broadcast(&session.requests_update_event());
        Ok(empty_object())
    }

    async fn handle_offer_controller(
        &self,
        ctx: &mut ConnCtx,
        p: TargetRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let offerer = self.bound_client(ctx)?;
        let target = parse_client_id(&p.target_client_id)?;
        let now = self.clock.now_wall_ms();

        if target == offerer {
            return Err(EventError::InvalidArgument(
                "Cannot offer the controller role to yourself".to_string(),
            ));
        }

        let mut session = handle.state.lock().await;
        if !session.members.is_controller_conn(ctx.conn_id()) {
            return Err(EventError::Unauthorized(
                "Only the controller can offer the role".to_string(),
            ));
        }
        if session.members.get_by_client(&target).is_none() {
            return Err(EventError::NotFound(
                "Target client is not in the session".to_string(),
            ));
        }
        let offerer_name = member_display_name(&session, ctx.conn_id())?;
        session.arbiter.add_offer(offerer.clone(), target.clone(), now);

        session.send_to_client(
            &target,
            &ServerEvent::ControllerOfferReceived {
                offerer_client_id: offerer,
                offerer_name,
            },
        );
        ctx.handle.send_event(&ServerEvent::ControllerOfferSent {
            target_client_id: target,
        });
        Ok(empty_object())
    }

    async fn handle_accept_offer(
        &self,
        ctx: &mut ConnCtx,
        p: OffererRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let me = self.bound_client(ctx)?;
        let offerer = parse_client_id(&p.offerer_client_id)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        let offer = session
            .arbiter
            .take_offer(&me)
            .ok_or_else(|| EventError::ExpiredOrGone("No pending controller offer".to_string()))?;

        // The offer survives only while the offerer still holds the role.
        if offer.offerer != offerer
            || session.members.controller_client() != Some(&offer.offerer)
        {
            return Err(EventError::ExpiredOrGone(
                "Controller offer is no longer valid".to_string(),
            ));
        }

        if session.transfer_controller(&me).is_none() {
            return Err(EventError::Transient(
                "Accepting connection is no longer a member".to_string(),
            ));
        }

        session.broadcast(&session.controller_change_event());
        session.broadcast(&ServerEvent::ControllerClientChange {
            controller_client_id: Some(me),
        });
        session.broadcast(&session.requests_update_event());
        let payload = session.sync_state_payload(now);
        session.broadcast(&ServerEvent::SyncState(payload));
        Ok(empty_object())
    }

    async fn handle_decline_offer(
        &self,
        ctx: &mut ConnCtx,
        p: SessionRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let me = self.bound_client(ctx)?;

        let mut session = handle.state.lock().await;
        let offer = session
            .arbiter
            .take_offer(&me)
            .ok_or_else(|| EventError::ExpiredOrGone("No pending controller offer".to_string()))?;

        // Only the offerer learns about the decline.
        session.send_to_client(
            &offer.offerer,
            &ServerEvent::ControllerOfferDeclined {
                target_client_id: me,
            },
        );
        Ok(empty_object())
    }

    // -- chat & reactions ---------------------------------------------------

    async fn handle_chat_message(
        &self,
        ctx: &mut ConnCtx,
        p: ChatSendPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;
        let now = self.clock.now_wall_ms();

        if !ctx.limiter.try_admit(now) {
            return Err(EventError::RateLimited(
                "You're sending messages too quickly, please slow down".to_string(),
            ));
        }
        let text = sanitize::sanitize_chat(&p.message)?;

        let mut session = handle.state.lock().await;
        let display_name = member_display_name(&session, ctx.conn_id())?;
        let message = ChatMessage::new(client_id, display_name, text, now);
        let message_id = message.message_id;
        session.chat.push(message.clone());
        session.broadcast(&ServerEvent::Chat(message));

        Ok(serde_json::json!({ "message_id": message_id }))
    }

    async fn handle_edit_message(
        &self,
        ctx: &mut ConnCtx,
        p: ChatEditPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;
        let text = sanitize::sanitize_chat(&p.message)?;
        let now = self.clock.now_wall_ms();

        let mut session = handle.state.lock().await;
        let updated = session.chat.edit(p.message_id, &client_id, text, now)?;
        session.broadcast(&ServerEvent::MessageEdited(updated));
        Ok(empty_object())
    }

    async fn handle_delete_message(
        &self,
        ctx: &mut ConnCtx,
        p: ChatDeletePayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;

        let mut session = handle.state.lock().await;
        session.chat.delete(p.message_id, &client_id)?;
        session.broadcast(&ServerEvent::MessageDeleted {
            message_id: p.message_id,
        });
        Ok(empty_object())
    }

    async fn handle_reaction(
        &self,
        ctx: &mut ConnCtx,
        p: ReactionPayload,
        add: bool,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;
        let emoji = sanitize::validate_emoji(&p.emoji)?;

        let mut session = handle.state.lock().await;
        if add {
            session
                .chat
                .add_reaction(p.message_id, emoji, client_id)?;
        } else {
            session
                .chat
                .remove_reaction(p.message_id, &emoji, &client_id)?;
        }
        let reactions = session.chat.reactions_for(p.message_id);
        session.broadcast(&ServerEvent::MessageReactionsUpdated {
            message_id: p.message_id,
            reactions,
        });
        Ok(empty_object())
    }

    async fn handle_typing(
        &self,
        ctx: &mut ConnCtx,
        p: SessionRefPayload,
        typing: bool,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;

        let session = handle.state.lock().await;
        let event = if typing {
            let display_name = member_display_name(&session, ctx.conn_id())?;
            ServerEvent::UserTyping {
                client_id,
                display_name,
            }
        } else {
            ServerEvent::UserStopTyping { client_id }
        };
        session.broadcast_except(ctx.conn_id(), &event);
        Ok(empty_object())
    }

    // -- time sync & drift --------------------------------------------------

    fn handle_time_sync(
        &self,
        p: TimeSyncPayload,
        received_ms: u64,
    ) -> Result<Value, EventError> {
        if !p.client_sent.is_finite() || p.client_sent < 0.0 {
            return Err(EventError::InvalidArgument(
                "client_sent must be a non-negative number".to_string(),
            ));
        }
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "Validated finite and non-negative above"
        )]
        let client_sent = p.client_sent as u64;
        let reply = timesync::respond(&self.clock, client_sent, received_ms);
        serde_json::to_value(reply)
            .map_err(|e| EventError::Transient(format!("time sync encode failed: {e}")))
    }

    async fn handle_drift_report(
        &self,
        ctx: &mut ConnCtx,
        p: DriftReportPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let client_id = self.bound_client(ctx)?;
        let reported = parse_client_id(&p.client_id)?;
        if reported != client_id {
            return Err(EventError::InvalidArgument(
                "client_id does not match the connection identity".to_string(),
            ));
        }
        if !p.drift_s.is_finite() {
            return Err(EventError::InvalidArgument(
                "drift_s must be a finite number".to_string(),
            ));
        }

        let sample = DriftSample {
            drift_s: p.drift_s,
            wall_ms: p.wall_ms,
            manual: p.manual.unwrap_or(false),
            before: p.before,
            after: p.after,
            improvement: p.improvement,
            duration: p.duration,
        };

        let mut session = handle.state.lock().await;
        session.drift.record(client_id, sample);
        Ok(empty_object())
    }

    async fn handle_sync_request(
        &self,
        ctx: &mut ConnCtx,
        p: SessionRefPayload,
    ) -> Result<Value, EventError> {
        let handle = self.bound_session(ctx, &p.session_id)?;
        let now = self.clock.now_wall_ms();

        let session = handle.state.lock().await;
        let snapshot = session.snapshot(now);
        drop(session);

        serde_json::to_value(snapshot)
            .map_err(|e| EventError::Transient(format!("snapshot encode failed: {e}")))
    }

    // -- helpers ------------------------------------------------------------

    /// Resolve the session named in a payload against the connection's
    /// binding.
    fn bound_session(
        &self,
        ctx: &ConnCtx,
        session_id: &str,
    ) -> Result<Arc<SessionHandle>, EventError> {
        let session_id = parse_session_id(session_id)?;
        let handle = ctx
            .session
            .as_ref()
            .ok_or_else(|| EventError::NotFound("Join a session first".to_string()))?;
        if handle.id != session_id {
            return Err(EventError::Unauthorized(
                "Not a member of that session".to_string(),
            ));
        }
        Ok(Arc::clone(handle))
    }

    fn bound_client(&self, ctx: &ConnCtx) -> Result<ClientId, EventError> {
        ctx.client_id.clone().ok_or_else(|| {
            EventError::Transient("Connection has no client identity".to_string())
        })
    }
}

/// Display name of the member behind `conn_id`.
fn member_display_name(
    session: &crate::session::Session,
    conn_id: ConnId,
) -> Result<String, EventError> {
    session
        .members()
        .get(conn_id)
        .map(|m| m.display_name.clone())
        .ok_or_else(|| EventError::Transient("Connection is not a session member".to_string()))
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, EventError> {
    serde_json::from_value(payload)
        .map_err(|e| EventError::InvalidArgument(format!("Invalid payload: {e}")))
}

fn parse_session_id(raw: &str) -> Result<SessionId, EventError> {
    SessionId::parse(raw)
        .map_err(|_| EventError::InvalidArgument("Invalid session id".to_string()))
}

fn parse_client_id(raw: &str) -> Result<ClientId, EventError> {
    ClientId::parse(raw)
        .map_err(|_| EventError::InvalidArgument("Invalid client id".to_string()))
}

fn parse_position_ms(timestamp: f64) -> Result<u64, EventError> {
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(EventError::InvalidArgument(
            "timestamp must be a non-negative number of milliseconds".to_string(),
        ));
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "Validated finite and non-negative above"
    )]
    let position = timestamp as u64;
    Ok(position)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
