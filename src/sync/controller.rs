//! Orchestration of the synchronization core.
//!
//! The controller owns the active-conversation cell and every piece of
//! derived state. It never awaits: history fetches and sends are handed out
//! as tickets which the caller resolves and feeds back, so a response that
//! lost a race with a conversation switch can be recognised and dropped.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::api::client::SentMessage;
use crate::api::events::{ClientEvent, ServerEvent};
use crate::api::models::{ConversationId, CorrelationId, Message, User};
use crate::error::{Result, SyncError};
use crate::sync::presence::{PresenceDebouncer, PresenceSignal};
use crate::sync::reconciler::MessageReconciler;
use crate::sync::router::{ActiveConversation, ConversationRouter, Route};
use crate::transport::Outbound;

/// An outstanding history fetch, valid only while its generation is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    pub conversation: ConversationId,
    generation: u64,
}

/// An outstanding REST send for a pending message.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub conversation: ConversationId,
    pub correlation: CorrelationId,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied(usize),
    /// The conversation changed while the fetch was in flight.
    Stale,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    ConnectionLost,
    FetchFailed,
}

/// A transient, user-visible problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub description: String,
}

impl Notice {
    fn connection_lost(description: &str) -> Self {
        Self {
            kind: NoticeKind::ConnectionLost,
            title: "Connection lost".to_string(),
            description: description.to_string(),
        }
    }

    fn fetch_failed(description: &str) -> Self {
        Self {
            kind: NoticeKind::FetchFailed,
            title: "Error Occured!".to_string(),
            description: description.to_string(),
        }
    }
}

/// What the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub active: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub notifications: Vec<Message>,
    pub peer_typing: bool,
    pub loading: bool,
    pub connected: bool,
}

pub struct SyncController<T> {
    transport: T,
    user: User,
    active: ActiveConversation,
    presence: PresenceDebouncer,
    router: ConversationRouter,
    reconciler: MessageReconciler,
    remote_typing: HashMap<ConversationId, bool>,
    connected: bool,
    loading: bool,
    notices: Vec<Notice>,
    refresh_requested: bool,
    /// A `ConnectionLost` notice was raised for the current outage.
    outage_reported: bool,
    /// State behind [`ChatView`] changed since the last [`take_view`](Self::take_view).
    dirty: bool,
}

impl<T: Outbound> SyncController<T> {
    pub fn new(transport: T, user: User, typing_window: Duration) -> Self {
        Self {
            transport,
            user,
            active: ActiveConversation::default(),
            presence: PresenceDebouncer::new(typing_window),
            router: ConversationRouter::new(),
            reconciler: MessageReconciler::new(),
            remote_typing: HashMap::new(),
            connected: false,
            loading: false,
            notices: Vec::new(),
            refresh_requested: false,
            outage_reported: false,
            dirty: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn messages(&self) -> &[Message] {
        self.reconciler.list()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Message> {
        self.router.notifications().iter()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_peer_typing(&self) -> bool {
        self.active
            .get()
            .and_then(|id| self.remote_typing.get(id))
            .copied()
            .unwrap_or(false)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Whether the chat list should be fetched again. Clears the flag.
    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    pub fn view(&self) -> ChatView {
        ChatView {
            active: self.active.get().cloned(),
            messages: self.reconciler.list().to_vec(),
            notifications: self.router.notifications().iter().cloned().collect(),
            peer_typing: self.is_peer_typing(),
            loading: self.loading,
            connected: self.connected,
        }
    }

    /// A fresh view if anything it shows changed since the last call.
    pub fn take_view(&mut self) -> Option<ChatView> {
        if std::mem::take(&mut self.dirty) { Some(self.view()) } else { None }
    }

    /// A connection attempt failed before the session came up.
    ///
    /// Raises one `ConnectionLost` notice per outage; a drop already
    /// reported by [`ServerEvent::Disconnected`] is not repeated.
    pub fn connect_failed(&mut self, reason: &str) {
        log::warn!("connect failed: {}", reason);
        if !self.outage_reported {
            self.outage_reported = true;
            self.notices.push(Notice::connection_lost(reason));
        }
    }

    /// Reconnecting stopped after `attempts` failures.
    pub fn reconnect_abandoned(&mut self, attempts: u32) {
        log::error!("giving up after {} connection attempts", attempts);
        self.notices.push(Notice::connection_lost(&format!("gave up after {attempts} attempts")));
    }

    /// Makes `conversation` the active one. The returned ticket must be
    /// resolved with [`apply_history`](Self::apply_history).
    pub fn select_conversation(&mut self, conversation: ConversationId) -> HistoryTicket {
        self.dirty = true;
        self.end_typing_session();
        let generation = self.active.switch_to(conversation.clone());
        self.reconciler.reset(Some(conversation.clone()));
        self.remote_typing.clear();
        self.router.notifications_mut().take_conversation(&conversation);
        self.loading = true;
        if self.connected {
            self.emit(ClientEvent::JoinChat(conversation.clone()));
        }
        log::debug!("selected conversation {} (generation {})", conversation, generation);
        HistoryTicket { conversation, generation }
    }

    /// Clears the active conversation.
    pub fn leave_conversation(&mut self) {
        self.dirty = true;
        self.end_typing_session();
        self.active.clear();
        self.reconciler.reset(None);
        self.remote_typing.clear();
        self.loading = false;
    }

    pub fn apply_history(&mut self, ticket: HistoryTicket, result: Result<Vec<Message>>) -> HistoryOutcome {
        if ticket.generation != self.active.generation() {
            log::debug!("discarding stale history for {}", ticket.conversation);
            return HistoryOutcome::Stale;
        }
        self.dirty = true;
        self.loading = false;
        match result {
            Ok(history) => {
                let history: Vec<Message> = history
                    .into_iter()
                    .filter(|m| m.conversation_id == ticket.conversation)
                    .collect();
                let n = history.len();
                self.reconciler.load_history(history);
                HistoryOutcome::Applied(n)
            }
            Err(e) => {
                log::warn!("history fetch for {} failed: {}", ticket.conversation, e);
                self.notices.push(Notice::fetch_failed("Failed to Load the Messages"));
                HistoryOutcome::Failed
            }
        }
    }

    /// A local keystroke in the composer.
    pub fn keystroke(&mut self, now: Instant) {
        if !self.connected {
            return;
        }
        let Some(conversation) = self.active.get().cloned() else { return };
        for signal in self.presence.on_keystroke(&conversation, now) {
            self.emit_presence(signal);
        }
    }

    pub fn presence_deadline(&self) -> Option<Instant> {
        self.presence.deadline()
    }

    pub fn poll_presence(&mut self, now: Instant) {
        if let Some(signal) = self.presence.on_timer(now) {
            self.emit_presence(signal);
        }
    }

    /// Starts sending `body` to the active conversation.
    ///
    /// The message is listed as pending at once; complete the returned send
    /// with [`complete_send`](Self::complete_send). Fails without side effects
    /// when disconnected.
    pub fn send_text(&mut self, body: &str) -> Result<PendingSend> {
        if body.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let conversation = self.active.get().cloned().ok_or(SyncError::NoActiveConversation)?;
        if !self.connected || !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }

        self.presence.force_idle();
        self.emit(ClientEvent::StopTyping(conversation.clone()));

        let pending = Message::pending(conversation.clone(), self.user.id.clone(), body, Utc::now());
        let correlation = pending.correlation_id.unwrap_or_else(uuid::Uuid::new_v4);
        self.dirty = true;
        self.reconciler.append(Message { correlation_id: Some(correlation), ..pending });
        Ok(PendingSend {
            conversation,
            correlation,
            body: body.to_string(),
        })
    }

    pub fn complete_send(&mut self, send: PendingSend, result: Result<SentMessage>) {
        match result {
            Ok(SentMessage { message, raw }) => {
                self.emit(ClientEvent::NewMessage(raw));
                if self.reconciler.conversation() == Some(&send.conversation) {
                    self.dirty = true;
                    self.reconciler.confirm(send.correlation, message);
                }
            }
            Err(e) => {
                log::warn!("send to {} failed: {}", send.conversation, e);
                self.notices.push(Notice::fetch_failed("Failed to send the Message"));
            }
        }
    }

    /// Rolls back a pending message that will not be retried.
    pub fn discard_pending(&mut self, correlation: CorrelationId) -> Option<Message> {
        let removed = self.reconciler.discard_pending(correlation);
        self.dirty |= removed.is_some();
        removed
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                log::info!("session ready");
                self.dirty = true;
                self.connected = true;
                self.outage_reported = false;
                if let Some(active) = self.active.get().cloned() {
                    self.emit(ClientEvent::JoinChat(active));
                }
            }
            ServerEvent::Disconnected { reason } => {
                self.dirty = true;
                self.connected = false;
                self.presence.force_idle();
                self.remote_typing.clear();
                self.outage_reported = true;
                self.notices.push(Notice::connection_lost(&reason));
            }
            ServerEvent::MessageReceived(message) => match self.router.route(&message, &self.active) {
                Route::ActiveList => {
                    self.dirty |= self.reconciler.append(message);
                }
                Route::Notification => {
                    self.dirty = true;
                    self.refresh_requested = true;
                }
                Route::Duplicate => {}
            },
            ServerEvent::Typing(room) => self.set_remote_typing(room, true),
            ServerEvent::StopTyping(room) => self.set_remote_typing(room, false),
        }
    }

    fn set_remote_typing(&mut self, room: Option<ConversationId>, typing: bool) {
        if let Some(id) = room.or_else(|| self.active.get().cloned()) {
            self.dirty |= self.remote_typing.insert(id, typing) != Some(typing);
        }
    }

    fn end_typing_session(&mut self) {
        if let Some(signal) = self.presence.force_idle() {
            if self.connected {
                self.emit_presence(signal);
            }
        }
    }

    fn emit_presence(&mut self, signal: PresenceSignal) {
        let event = match signal {
            PresenceSignal::StartTyping(id) => ClientEvent::Typing(id),
            PresenceSignal::StopTyping(id) => ClientEvent::StopTyping(id),
        };
        self.emit(event);
    }

    fn emit(&mut self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.transport.send(event) {
            log::warn!("could not emit {:?}: {}", name, e);
        }
    }
}
