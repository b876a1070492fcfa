//! In-memory chat log and reaction aggregation

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use uuid::Uuid;

use crate::error::EventError;
use crate::types::{ChatMessage, ClientId};

/// Aggregated reactions for one message: emoji to reacting clients.
pub type ReactionMap = BTreeMap<String, BTreeSet<ClientId>>;

/// Per-session message log with reaction state.
///
/// The log is bounded; once the cap is reached the oldest message (and its
/// reactions) is dropped.
#[derive(Debug)]
pub struct ChatStore {
    messages: VecDeque<ChatMessage>,
    reactions: HashMap<Uuid, ReactionMap>,
    cap: usize,
}

impl ChatStore {
    /// Store retaining at most `cap` messages.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            reactions: HashMap::new(),
            cap: cap.max(1),
        }
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Retained messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Append a message, evicting the oldest past the cap.
    pub fn push(&mut self, message: ChatMessage) {
        if self.messages.len() == self.cap {
            if let Some(evicted) = self.messages.pop_front() {
                self.reactions.remove(&evicted.message_id);
            }
        }
        self.messages.push_back(message);
    }

    /// Replace the text of a message.
    ///
    /// Only the original sender may edit; deleted messages cannot be
    /// edited.
    ///
    /// # Errors
    /// `NotFound` for unknown or deleted messages, `Unauthorized` when the
    /// editor is not the sender.
    pub fn edit(
        &mut self,
        message_id: Uuid,
        editor: &ClientId,
        new_text: String,
        now_ms: u64,
    ) -> Result<ChatMessage, EventError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| EventError::NotFound("Message not found".to_string()))?;
        if message.deleted {
            return Err(EventError::NotFound("Message was deleted".to_string()));
        }
        if &message.sender_client_id != editor {
            return Err(EventError::Unauthorized(
                "Only the sender can edit a message".to_string(),
            ));
        }
        message.message = new_text;
        message.edited = true;
        message.edited_at = Some(now_ms);
        Ok(message.clone())
    }

    /// Mark a message deleted.
    ///
    /// # Errors
    /// `NotFound` for unknown messages, `Unauthorized` when the caller is
    /// not the sender.
    pub fn delete(&mut self, message_id: Uuid, caller: &ClientId) -> Result<(), EventError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| EventError::NotFound("Message not found".to_string()))?;
        if &message.sender_client_id != caller {
            return Err(EventError::Unauthorized(
                "Only the sender can delete a message".to_string(),
            ));
        }
        message.deleted = true;
        message.message.clear();
        self.reactions.remove(&message_id);
        Ok(())
    }

    /// Add `client` to the reactor set for (`message_id`, `emoji`).
    /// Idempotent.
    ///
    /// # Errors
    /// `NotFound` if the message is unknown or deleted.
    pub fn add_reaction(
        &mut self,
        message_id: Uuid,
        emoji: String,
        client: ClientId,
    ) -> Result<(), EventError> {
        self.require_live_message(message_id)?;
        self.reactions
            .entry(message_id)
            .or_default()
            .entry(emoji)
            .or_default()
            .insert(client);
        Ok(())
    }

    /// Remove `client` from the reactor set. Idempotent; empty sets and
    /// maps are pruned.
    ///
    /// # Errors
    /// `NotFound` if the message is unknown or deleted.
    pub fn remove_reaction(
        &mut self,
        message_id: Uuid,
        emoji: &str,
        client: &ClientId,
    ) -> Result<(), EventError> {
        self.require_live_message(message_id)?;
        if let Some(by_emoji) = self.reactions.get_mut(&message_id) {
            if let Some(set) = by_emoji.get_mut(emoji) {
                set.remove(client);
                if set.is_empty() {
                    by_emoji.remove(emoji);
                }
            }
            if by_emoji.is_empty() {
                self.reactions.remove(&message_id);
            }
        }
        Ok(())
    }

    /// Aggregated reactions for one message (empty map if none).
    #[must_use]
    pub fn reactions_for(&self, message_id: Uuid) -> ReactionMap {
        self.reactions.get(&message_id).cloned().unwrap_or_default()
    }

    /// Every message id that currently has reactions, with its aggregate.
    pub fn all_reactions(&self) -> impl Iterator<Item = (&Uuid, &ReactionMap)> {
        self.reactions.iter()
    }

    fn require_live_message(&self, message_id: Uuid) -> Result<(), EventError> {
        let message = self
            .messages
            .iter()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| EventError::NotFound("Message not found".to_string()))?;
        if message.deleted {
            return Err(EventError::NotFound("Message was deleted".to_string()));
        }
        Ok(())
    }
}
