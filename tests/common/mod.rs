//! A minimal Socket.IO v4 server speaking just enough of the protocol to
//! drive the client in tests.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use chat_sync::api::packet::Packet;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct FakeServer {
    pub url: Url,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

/// A loopback address nothing is listening on (yet).
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn socket_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("ws://{addr}/socket.io/?EIO=4&transport=websocket")).unwrap()
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    if tx.send(ServerConn { ws }).is_err() {
                        break;
                    }
                }
            }
        });
        Self { url: socket_url(addr), conns: rx }
    }

    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.conns.recv()).await.expect("no client connected").unwrap()
    }
}

pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    /// Runs the engine/namespace handshake and returns the `setup` payload.
    pub async fn handshake(&mut self) -> Value {
        self.handshake_with_pings(25_000, 20_000).await
    }

    pub async fn handshake_with_pings(&mut self, ping_interval: u64, ping_timeout: u64) -> Value {
        self.send_packet(Packet::Open(json!({
            "sid": "test-sid",
            "upgrades": [],
            "pingInterval": ping_interval,
            "pingTimeout": ping_timeout
        })))
        .await;
        match self.recv_packet().await {
            Packet::Connect(_) => {}
            other => panic!("expected namespace connect, got {other:?}"),
        }
        self.send_packet(Packet::Connect(Some(json!({ "sid": "ns-sid" })))).await;
        let (name, mut args) = self.recv_event().await;
        assert_eq!(name, "setup");
        args.remove(0)
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_packet(&mut self, packet: Packet) {
        self.send_raw(&packet.encode()).await;
    }

    pub async fn emit(&mut self, name: &str, args: Vec<Value>) {
        self.send_packet(Packet::event(name, args)).await;
    }

    pub async fn recv_packet(&mut self) -> Packet {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("client went quiet")
                .expect("client closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return Packet::decode(&text).unwrap();
            }
        }
    }

    pub async fn recv_event(&mut self) -> (String, Vec<Value>) {
        loop {
            if let Packet::Event { name, args } = self.recv_packet().await {
                return (name, args);
            }
        }
    }

    /// Skips events until one named `name` arrives.
    pub async fn expect_event(&mut self, name: &str) -> Vec<Value> {
        loop {
            let (got, args) = self.recv_event().await;
            if got == name {
                return args;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn wire_message(id: &str, chat: &str, sender: &str, content: &str) -> Value {
    json!({
        "_id": id,
        "sender": { "_id": sender, "name": sender },
        "content": content,
        "chat": { "_id": chat, "users": [] },
        "createdAt": "2021-10-03T12:00:00.000Z"
    })
}
