//! Wire-level event catalogue
//!
//! One frame is one JSON envelope: `{ "event", "payload", "ack"? }`.
//! Inbound payloads deserialize into the structs below (unknown fields are
//! dropped); outbound events serialize from [`ServerEvent`], which carries
//! the event name as its serde tag. Ack replies are built by the router and
//! are not part of the enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::session::chat::ReactionMap;
use crate::session::controller::PendingRequest;
use crate::types::{ChatMessage, ClientId, ConnId, SessionId, Track, TrackMetadata};

/// Raw inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,
    /// Event-specific payload; defaults to null for payloadless events
    #[serde(default)]
    pub payload: Value,
    /// Ack correlation id; present when the client wants a reply
    #[serde(default)]
    pub ack: Option<u64>,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// `join_session`
#[derive(Debug, Clone, Deserialize)]
pub struct JoinSessionPayload {
    /// Target session
    pub session_id: String,
    /// Persistent client identity
    pub client_id: String,
    /// Optional display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Opaque device description
    #[serde(default)]
    pub device_info: Option<Value>,
}

/// `play` / `pause` / `seek`
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackCmdPayload {
    /// Target session
    pub session_id: String,
    /// Position in milliseconds
    pub timestamp: f64,
}

/// Custom track supplied inline to `track_change`
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingTrack {
    /// Audio URL
    pub url: String,
    /// Optional title
    #[serde(default)]
    pub title: Option<String>,
    /// Open metadata
    #[serde(default, alias = "meta")]
    pub metadata: Option<TrackMetadata>,
}

/// `track_change`
#[derive(Debug, Clone, Deserialize)]
pub struct TrackChangePayload {
    /// Target session
    pub session_id: String,
    /// Queue index to select
    #[serde(default)]
    pub idx: Option<i64>,
    /// Track to select (appended first if its URL is not queued)
    #[serde(default)]
    pub track: Option<IncomingTrack>,
}

/// `add_to_queue`
#[derive(Debug, Clone, Deserialize)]
pub struct AddToQueuePayload {
    /// Target session
    pub session_id: String,
    /// Audio URL; unique within the queue
    pub url: String,
    /// Optional title
    #[serde(default)]
    pub title: Option<String>,
    /// Open metadata
    #[serde(default, alias = "meta")]
    pub metadata: Option<TrackMetadata>,
}

/// `remove_from_queue`
#[derive(Debug, Clone, Deserialize)]
pub struct RemoveFromQueuePayload {
    /// Target session
    pub session_id: String,
    /// Queue index
    #[serde(default)]
    pub index: Option<i64>,
    /// Alternative: track id
    #[serde(default, alias = "trackId")]
    pub track_id: Option<Uuid>,
}

/// Events carrying only a session reference
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRefPayload {
    /// Target session
    pub session_id: String,
}

/// `approve_controller_request` / `deny_controller_request`
#[derive(Debug, Clone, Deserialize)]
pub struct RequesterRefPayload {
    /// Target session
    pub session_id: String,
    /// Client whose request is being resolved
    #[serde(alias = "requesterClientId")]
    pub requester_client_id: String,
}

/// `offer_controller` / `decline_controller_offer`
#[derive(Debug, Clone, Deserialize)]
pub struct TargetRefPayload {
    /// Target session
    pub session_id: String,
    /// Client the offer is addressed to
    #[serde(alias = "targetClientId")]
    pub target_client_id: String,
}

/// `accept_controller_offer`
#[derive(Debug, Clone, Deserialize)]
pub struct OffererRefPayload {
    /// Target session
    pub session_id: String,
    /// Client that made the offer
    #[serde(alias = "offererClientId")]
    pub offerer_client_id: String,
}

/// `chat_message`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSendPayload {
    /// Target session
    pub session_id: String,
    /// Raw message text (sanitized by the router)
    pub message: String,
}

/// `edit_message`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEditPayload {
    /// Target session
    pub session_id: String,
    /// Message to edit
    #[serde(alias = "messageId")]
    pub message_id: Uuid,
    /// Replacement text
    pub message: String,
}

/// `delete_message`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatDeletePayload {
    /// Target session
    pub session_id: String,
    /// Message to delete
    #[serde(alias = "messageId")]
    pub message_id: Uuid,
}

/// `emoji_reaction` / `remove_emoji_reaction`
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    /// Target session
    pub session_id: String,
    /// Message reacted to
    #[serde(alias = "messageId")]
    pub message_id: Uuid,
    /// Reaction emoji
    pub emoji: String,
}

/// `time_sync`
#[derive(Debug, Clone, Deserialize)]
pub struct TimeSyncPayload {
    /// Client wall time at send, milliseconds
    #[serde(alias = "clientSent")]
    pub client_sent: f64,
}

/// `drift_report`
#[derive(Debug, Clone, Deserialize)]
pub struct DriftReportPayload {
    /// Target session
    pub session_id: String,
    /// Reporting client
    #[serde(alias = "clientId")]
    pub client_id: String,
    /// Observed drift in seconds
    pub drift_s: f64,
    /// Client wall time of the observation
    pub wall_ms: u64,
    /// Manual resync marker
    #[serde(default)]
    pub manual: Option<bool>,
    /// Drift before a manual resync
    #[serde(default)]
    pub before: Option<f64>,
    /// Drift after a manual resync
    #[serde(default)]
    pub after: Option<f64>,
    /// Improvement achieved
    #[serde(default)]
    pub improvement: Option<f64>,
    /// Resync duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

// ---------------------------------------------------------------------------
// Outbound payload shapes
// ---------------------------------------------------------------------------

/// Authoritative playback snapshot fanned out as `sync_state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatePayload {
    /// Whether the session is playing
    pub is_playing: bool,
    /// Smoothed authoritative position in ms
    pub timestamp_ms: u64,
    /// Wall time of the last authoritative change
    pub last_updated_ms: u64,
    /// Live controller connection
    pub controller_conn_id: Option<ConnId>,
    /// Server wall time when the snapshot was taken
    pub server_time_ms: u64,
    /// Session sync version
    pub sync_version: u64,
}

/// One row of a `clients_update`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientEntry {
    /// Connection id
    pub conn_id: ConnId,
    /// Client identity
    pub client_id: ClientId,
    /// Display name
    pub display_name: String,
    /// Opaque device description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<Value>,
    /// Whether this member holds the controller role
    pub is_controller: bool,
}

/// One row of a `controller_requests_update`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEntry {
    /// Requesting client
    pub client_id: ClientId,
    /// Requester display name
    pub requester_name: String,
    /// Wall time the request was filed
    pub requested_at: u64,
}

impl From<&PendingRequest> for RequestEntry {
    fn from(request: &PendingRequest) -> Self {
        Self {
            client_id: request.client_id.clone(),
            requester_name: request.requester_name.clone(),
            requested_at: request.requested_at_ms,
        }
    }
}

/// Full session snapshot returned from `join_session` and `sync_request`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Whether the session is playing
    pub is_playing: bool,
    /// Smoothed authoritative position in ms
    pub timestamp: u64,
    /// Wall time of the last authoritative change
    pub last_updated: u64,
    /// Live controller connection
    pub controller_conn_id: Option<ConnId>,
    /// Authoritative controller client
    pub controller_client_id: Option<ClientId>,
    /// Queue contents
    pub queue: Vec<Track>,
    /// Selected queue index
    pub selected_idx: usize,
    /// Selected track, if the queue is non-empty
    pub current_track: Option<Track>,
    /// Uninterpreted per-session settings
    pub session_settings: serde_json::Map<String, Value>,
    /// Average recent drift across members, seconds
    pub drift: Option<f64>,
    /// Session sync version
    pub sync_version: u64,
}

/// Events fanned out or sent directly to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Playback snapshot
    SyncState(SyncStatePayload),

    /// Full queue after a mutation
    QueueUpdate {
        /// Queue contents
        queue: Vec<Track>,
        /// Selected index
        selected_idx: usize,
    },

    /// Selected track changed
    TrackChange {
        /// New selected index, `None` when the queue emptied
        idx: Option<usize>,
        /// New selected track
        track: Option<Track>,
        /// Why the selection moved
        reason: String,
    },

    /// Membership changed
    ClientsUpdate {
        /// All members in join order
        clients: Vec<ClientEntry>,
    },

    /// Controller connection binding changed
    ControllerChange {
        /// Live controller connection
        controller_conn_id: Option<ConnId>,
        /// Authoritative controller client
        controller_client_id: Option<ClientId>,
    },

    /// Authoritative controller client changed
    ControllerClientChange {
        /// New controller client
        controller_client_id: Option<ClientId>,
    },

    /// Pending controller requests changed
    ControllerRequestsUpdate {
        /// All pending requests
        requests: Vec<RequestEntry>,
    },

    /// Direct to the controller: a listener asked for the role
    ControllerRequestReceived {
        /// Requesting client
        client_id: ClientId,
        /// Requester display name
        requester_name: String,
    },

    /// Direct to the offer target
    ControllerOfferReceived {
        /// Offering client
        offerer_client_id: ClientId,
        /// Offerer display name
        offerer_name: String,
    },

    /// Direct to the offerer: offer delivered
    ControllerOfferSent {
        /// Offer target
        target_client_id: ClientId,
    },

    /// Direct to the offerer: offer declined
    ControllerOfferDeclined {
        /// Offer target
        target_client_id: ClientId,
    },

    /// New chat message
    #[serde(rename = "chat_message")]
    Chat(ChatMessage),

    /// Chat backlog sent to a joiner
    ChatHistory {
        /// Retained messages, oldest first
        messages: Vec<ChatMessage>,
    },

    /// A message was edited
    MessageEdited(ChatMessage),

    /// A message was deleted
    MessageDeleted {
        /// Deleted message id
        message_id: Uuid,
    },

    /// Reaction aggregate for one message changed
    MessageReactionsUpdated {
        /// Message id
        message_id: Uuid,
        /// emoji to reacting clients
        reactions: ReactionMap,
    },

    /// A member started typing (not echoed to the sender)
    UserTyping {
        /// Typing client
        client_id: ClientId,
        /// Display name
        display_name: String,
    },

    /// A member stopped typing
    UserStopTyping {
        /// Client that stopped
        client_id: ClientId,
    },

    /// Session reaped or closed
    SessionClosed {
        /// Closed session
        session_id: SessionId,
        /// Human-readable reason
        reason: String,
    },

    /// Relayed peer signaling payload
    #[serde(rename = "peer-offer")]
    PeerOffer(Value),

    /// Relayed peer signaling payload
    #[serde(rename = "peer-answer")]
    PeerAnswer(Value),

    /// Relayed peer signaling payload
    #[serde(rename = "peer-ice-candidate")]
    PeerIceCandidate(Value),
}

impl ServerEvent {
    /// Serialize into a wire frame (without the trailing newline; the
    /// codec adds it).
    #[must_use]
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("failed to encode outbound event: {e}");
            String::from("{\"event\":\"encode_error\",\"payload\":null}")
        })
    }
}

/// Build an ack frame. `body` must be a JSON object; the correlation id is
/// injected as `ack`.
#[must_use]
pub fn ack_frame(ack_id: u64, body: Value) -> String {
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
    object.insert("ack".to_string(), Value::from(ack_id));
    let frame = serde_json::json!({ "event": "ack", "payload": Value::Object(object) });
    frame.to_string()
}
