use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(
    /// Server-assigned conversation (chat) identifier.
    ConversationId
);
opaque_id!(
    /// Server-assigned message identifier. Absent on pending messages.
    MessageId
);
opaque_id!(UserId);

/// Client-generated token linking a pending message to its confirmation.
pub type CorrelationId = Uuid;

/// The local user, sent verbatim in the `setup` handshake.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: ConversationId,
    #[serde(default, alias = "chatName", alias = "displayName")]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    LocalPending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
    pub correlation_id: Option<CorrelationId>,
}

impl Message {
    /// Builds an optimistic message with a fresh correlation id.
    pub fn pending(
        conversation_id: ConversationId,
        sender_id: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            conversation_id,
            sender_id,
            body: body.into(),
            created_at,
            origin: Origin::LocalPending,
            correlation_id: Some(Uuid::new_v4()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.origin == Origin::LocalPending
    }
}

/// A reference the server either sends as a bare id or as a populated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Bare(String),
    Populated {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl IdRef {
    pub fn id(&self) -> &str {
        match self {
            IdRef::Bare(id) => id,
            IdRef::Populated { id } => id,
        }
    }
}

/// Message document as the chat server serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: IdRef,
    #[serde(default)]
    pub content: String,
    pub chat: IdRef,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<CorrelationId>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Message {
            id: Some(MessageId::new(wire.id)),
            conversation_id: ConversationId::new(wire.chat.id()),
            sender_id: UserId::new(wire.sender.id()),
            body: wire.content,
            created_at: wire.created_at,
            origin: Origin::Confirmed,
            correlation_id: wire.client_id,
        }
    }
}
