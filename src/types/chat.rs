//! Chat message type

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::ClientId;

/// A chat message stored in a session's in-memory log.
///
/// Edits and deletions are flags on the original record; the log itself is
/// append-only so broadcast order matches storage order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message id
    pub message_id: Uuid,

    /// Stable identity of the sender
    pub sender_client_id: ClientId,

    /// Sender display name at send time
    pub display_name: String,

    /// Sanitized message text
    pub message: String,

    /// Wall-clock milliseconds when the message was accepted
    pub created_at: u64,

    /// Whether the message has been edited
    pub edited: bool,

    /// Wall-clock milliseconds of the last edit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<u64>,

    /// Whether the message has been deleted
    pub deleted: bool,
}

impl ChatMessage {
    /// Create a fresh message record.
    #[must_use]
    pub fn new(
        sender_client_id: ClientId,
        display_name: String,
        message: String,
        created_at: u64,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender_client_id,
            display_name,
            message,
            created_at,
            edited: false,
            edited_at: None,
            deleted: false,
        }
    }
}
