use std::collections::{HashSet, VecDeque};

use crate::api::models::{ConversationId, Message, MessageId};

/// The single cell holding which conversation is on screen.
///
/// Every switch bumps `generation`, which is what in-flight history requests
/// are checked against when they resolve.
#[derive(Debug, Default, Clone)]
pub struct ActiveConversation {
    current: Option<ConversationId>,
    generation: u64,
}

impl ActiveConversation {
    pub fn get(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is(&self, id: &ConversationId) -> bool {
        self.current.as_ref() == Some(id)
    }

    pub fn switch_to(&mut self, id: ConversationId) -> u64 {
        self.current = Some(id);
        self.generation += 1;
        self.generation
    }

    pub fn clear(&mut self) -> u64 {
        self.current = None;
        self.generation += 1;
        self.generation
    }
}

/// Messages for conversations that are not on screen, newest first.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    items: VecDeque<Message>,
    seen: HashSet<MessageId>,
}

impl NotificationQueue {
    /// Returns `false` if a message with the same id is already queued.
    pub fn push(&mut self, message: Message) -> bool {
        if let Some(id) = &message.id {
            if !self.seen.insert(id.clone()) {
                return false;
            }
        }
        self.items.push_front(message);
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes and returns everything queued for `conversation`.
    pub fn take_conversation(&mut self, conversation: &ConversationId) -> Vec<Message> {
        let (taken, kept): (Vec<_>, Vec<_>) =
            self.items.drain(..).partition(|m| &m.conversation_id == conversation);
        self.items = kept.into();
        for m in &taken {
            if let Some(id) = &m.id {
                self.seen.remove(id);
            }
        }
        taken
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ActiveList,
    Notification,
    /// Already queued as a notification; dropped.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct ConversationRouter {
    notifications: NotificationQueue,
}

impl ConversationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes an inbound message against the active conversation as it is
    /// right now. Non-active messages are queued here.
    pub fn route(&mut self, message: &Message, active: &ActiveConversation) -> Route {
        if active.is(&message.conversation_id) {
            return Route::ActiveList;
        }
        if self.notifications.push(message.clone()) {
            Route::Notification
        } else {
            log::debug!("duplicate notification {:?} dropped", message.id);
            Route::Duplicate
        }
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationQueue {
        &mut self.notifications
    }
}
