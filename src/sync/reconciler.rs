//! Ordered message list for the active conversation.
//!
//! Confirmed messages are unique by server id. Pending messages carry a
//! client correlation id and are replaced in place once their send is
//! confirmed; if the server echo got in first, the pending entry is dropped
//! instead so the message is never shown twice.

use std::collections::HashSet;

use crate::api::models::{ConversationId, CorrelationId, Message, MessageId, Origin};

#[derive(Debug, Default)]
pub struct MessageReconciler {
    conversation: Option<ConversationId>,
    messages: Vec<Message>,
    known_ids: HashSet<MessageId>,
}

impl MessageReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub fn list(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Clears the list and scopes it to `conversation`.
    pub fn reset(&mut self, conversation: Option<ConversationId>) {
        self.conversation = conversation;
        self.messages.clear();
        self.known_ids.clear();
    }

    /// Appends a message. Returns `false` when it was dropped: a known id, or
    /// a message for another conversation.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.in_scope(&message) {
            log::debug!(
                "message for {} dropped from list scoped to {:?}",
                message.conversation_id,
                self.conversation
            );
            return false;
        }
        match message.id.clone() {
            Some(id) if self.known_ids.contains(&id) => {
                log::debug!("duplicate message {} ignored", id);
                false
            }
            Some(id) => {
                if let Some(idx) = message.correlation_id.and_then(|cid| self.pending_index(cid)) {
                    self.messages[idx] = message;
                } else {
                    self.messages.push(message);
                }
                self.known_ids.insert(id);
                true
            }
            None => {
                self.messages.push(message);
                true
            }
        }
    }

    /// Replaces the pending entry for `correlation` with its confirmation.
    pub fn confirm(&mut self, correlation: CorrelationId, mut confirmed: Message) -> bool {
        if !self.in_scope(&confirmed) {
            return false;
        }
        confirmed.origin = Origin::Confirmed;
        confirmed.correlation_id = Some(correlation);
        let pending = self.pending_index(correlation);
        let known = confirmed.id.as_ref().is_some_and(|id| self.known_ids.contains(id));
        match (pending, known) {
            (Some(idx), true) => {
                self.messages.remove(idx);
                false
            }
            (Some(idx), false) => {
                if let Some(id) = confirmed.id.clone() {
                    self.known_ids.insert(id);
                }
                self.messages[idx] = confirmed;
                true
            }
            (None, _) => self.append(confirmed),
        }
    }

    /// Drops a pending entry without confirmation.
    pub fn discard_pending(&mut self, correlation: CorrelationId) -> Option<Message> {
        self.pending_index(correlation).map(|idx| self.messages.remove(idx))
    }

    /// Installs fetched history, keeping entries that are not part of it
    /// (pending sends, live deliveries that beat the fetch) after it.
    pub fn load_history(&mut self, history: Vec<Message>) {
        let carried = std::mem::take(&mut self.messages);
        self.known_ids.clear();
        for message in history.into_iter().chain(carried) {
            self.append(message);
        }
    }

    fn in_scope(&self, message: &Message) -> bool {
        self.conversation.as_ref() == Some(&message.conversation_id)
    }

    fn pending_index(&self, correlation: CorrelationId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.is_pending() && m.correlation_id == Some(correlation))
    }
}
