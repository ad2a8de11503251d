//! Engine.IO v4 / Socket.IO v4 text framing for the websocket transport.
//!
//! Only the default namespace and text packets are produced. Incoming packets
//! may carry a namespace prefix or an ack id; both are accepted and dropped.

use serde_json::Value;

use crate::error::{Result, SyncError};

/// One text frame on the websocket.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine open with the handshake document (`sid`, `pingInterval`, ...).
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    /// Socket.IO namespace connect, with optional auth / ack payload.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Packet::Event { name: name.into(), args }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(doc) => format!("0{doc}"),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(auth)) => format!("40{auth}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                format!("42{}", Value::Array(items))
            }
            Packet::ConnectError(doc) => format!("44{doc}"),
        }
    }

    pub fn decode(text: &str) -> Result<Packet> {
        let mut chars = text.chars();
        let engine = chars
            .next()
            .ok_or_else(|| SyncError::Protocol("empty frame".into()))?;
        let rest = chars.as_str();
        match engine {
            '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => decode_socket(rest),
            other => Err(SyncError::Protocol(format!("unsupported engine packet type {other:?}"))),
        }
    }
}

fn decode_socket(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| SyncError::Protocol("empty socket packet".into()))?;
    let body = strip_ack_id(strip_namespace(chars.as_str()));
    match kind {
        '0' if body.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(serde_json::from_str(body)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let items: Vec<Value> = serde_json::from_str(body)?;
            let mut items = items.into_iter();
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(SyncError::Protocol("event without a name".into())),
            };
            Ok(Packet::Event { name, args: items.collect() })
        }
        '4' => Ok(Packet::ConnectError(serde_json::from_str(body)?)),
        other => Err(SyncError::Protocol(format!("unsupported socket packet type {other:?}"))),
    }
}

// "/admin,{...}" -> "{...}"
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}
