use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::models::{ConversationId, Message, User, WireMessage};
use crate::api::packet::Packet;
use crate::error::{Result, SyncError};

pub const SETUP: &str = "setup";
pub const CONNECTED: &str = "connected";
pub const JOIN_CHAT: &str = "join chat";
pub const NEW_MESSAGE: &str = "new message";
/// Spelled the way the chat server emits it.
pub const MESSAGE_RECEIVED: &str = "message recieved";
const MESSAGE_RECEIVED_ALT: &str = "message received";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop typing";

/// An event as it came off the wire, before interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub event_type: String,
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    MessageReceived,
    Typing,
    StopTyping,
    Disconnected,
}

/// Events delivered to session handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The server acknowledged `setup`.
    Connected,
    MessageReceived(Message),
    /// Remote peer started typing. `None` when the server omits the room.
    Typing(Option<ConversationId>),
    StopTyping(Option<ConversationId>),
    /// Raised locally when the connection drops.
    Disconnected { reason: String },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connected => EventKind::Connected,
            ServerEvent::MessageReceived(_) => EventKind::MessageReceived,
            ServerEvent::Typing(_) => EventKind::Typing,
            ServerEvent::StopTyping(_) => EventKind::StopTyping,
            ServerEvent::Disconnected { .. } => EventKind::Disconnected,
        }
    }

    /// Interprets a raw event. Unknown event names yield `Ok(None)`.
    pub fn from_incoming(event: IncomingEvent) -> Result<Option<Self>> {
        let IncomingEvent { event_type, data } = event;
        let first = data.into_iter().next();
        let parsed = match event_type.as_str() {
            CONNECTED => ServerEvent::Connected,
            MESSAGE_RECEIVED | MESSAGE_RECEIVED_ALT => {
                let payload = first.ok_or_else(|| {
                    SyncError::Protocol(format!("{event_type:?} without a message"))
                })?;
                let wire: WireMessage = serde_json::from_value(payload)?;
                ServerEvent::MessageReceived(Message::from(wire))
            }
            TYPING => ServerEvent::Typing(room_arg(first)),
            STOP_TYPING => ServerEvent::StopTyping(room_arg(first)),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

fn room_arg(arg: Option<Value>) -> Option<ConversationId> {
    match arg {
        Some(Value::String(room)) if !room.is_empty() => Some(ConversationId::new(room)),
        _ => None,
    }
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Setup(User),
    JoinChat(ConversationId),
    /// Server-confirmed message document, relayed as received from REST.
    NewMessage(Value),
    Typing(ConversationId),
    StopTyping(ConversationId),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Setup(_) => SETUP,
            ClientEvent::JoinChat(_) => JOIN_CHAT,
            ClientEvent::NewMessage(_) => NEW_MESSAGE,
            ClientEvent::Typing(_) => TYPING,
            ClientEvent::StopTyping(_) => STOP_TYPING,
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let arg = match self {
            ClientEvent::Setup(user) => serde_json::to_value(user)?,
            ClientEvent::JoinChat(id) | ClientEvent::Typing(id) | ClientEvent::StopTyping(id) => {
                Value::String(id.as_str().to_string())
            }
            ClientEvent::NewMessage(doc) => doc.clone(),
        };
        Ok(Packet::event(self.name(), vec![arg]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn incoming(name: &str, data: Vec<Value>) -> IncomingEvent {
        IncomingEvent { event_type: name.to_string(), data }
    }

    #[test]
    fn interprets_known_events() {
        let ev = ServerEvent::from_incoming(incoming("connected", vec![])).unwrap();
        assert_eq!(ev, Some(ServerEvent::Connected));

        let ev = ServerEvent::from_incoming(incoming("typing", vec![])).unwrap();
        assert_eq!(ev, Some(ServerEvent::Typing(None)));

        let ev = ServerEvent::from_incoming(incoming("stop typing", vec![json!("c1")])).unwrap();
        assert_eq!(ev, Some(ServerEvent::StopTyping(Some(ConversationId::new("c1")))));
    }

    #[test]
    fn accepts_both_spellings_of_delivery() {
        for name in ["message recieved", "message received"] {
            let ev = ServerEvent::from_incoming(incoming(
                name,
                vec![json!({ "_id": "m1", "sender": "u1", "content": "yo", "chat": "c1" })],
            ))
            .unwrap()
            .unwrap();
            assert_eq!(ev.kind(), EventKind::MessageReceived);
        }
    }

    #[test]
    fn unknown_event_is_ignored_and_bad_payload_errors() {
        assert!(ServerEvent::from_incoming(incoming("pong-ish", vec![])).unwrap().is_none());
        assert!(ServerEvent::from_incoming(incoming("message recieved", vec![])).is_err());
    }

    #[test]
    fn client_events_encode_room_as_string() {
        let pkt = ClientEvent::StopTyping(ConversationId::new("c7")).to_packet().unwrap();
        assert_eq!(pkt.encode(), r#"42["stop typing","c7"]"#);
    }
}
