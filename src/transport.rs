//! Long-lived socket session to the chat server.
//!
//! A [`TransportSession`] owns at most one websocket at a time. Handlers are
//! registered on the session rather than on the socket, so they keep firing
//! across reconnects. Sends are fire-and-forget and are refused with
//! [`SyncError::NotConnected`] until the server has acknowledged `setup`;
//! nothing is queued. A connection that stays silent longer than the ping
//! interval plus ping timeout announced by the server counts as dropped.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use url::Url;

use crate::api::events::{ClientEvent, EventKind, IncomingEvent, ServerEvent};
use crate::api::models::User;
use crate::api::packet::Packet;
use crate::error::{Result, SyncError};

/// What the controller needs from a transport.
pub trait Outbound {
    fn is_connected(&self) -> bool;
    fn send(&self, event: ClientEvent) -> Result<()>;
}

type Handler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

/// Handle returned by [`TransportSession::on_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub kind: EventKind,
    id: u64,
}

#[derive(Default)]
struct HandlerRegistry {
    next_id: u64,
    handlers: Vec<(u64, EventKind, Handler)>,
}

impl HandlerRegistry {
    fn dispatch(&self, event: &ServerEvent) {
        let kind = event.kind();
        for (_, k, handler) in &self.handlers {
            if *k == kind {
                handler(event);
            }
        }
    }
}

fn dispatch(registry: &Mutex<HandlerRegistry>, event: &ServerEvent) {
    match registry.lock() {
        Ok(guard) => guard.dispatch(event),
        Err(poisoned) => poisoned.into_inner().dispatch(event),
    }
}

struct Link {
    outbound: mpsc::UnboundedSender<Packet>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the engine open and namespace ack.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// A pending connection attempt, detached from its session.
#[derive(Debug, Clone)]
pub struct Dialer {
    url: Url,
    token: Option<String>,
    generation: u64,
    timeout: Duration,
}

/// A socket past the Engine.IO and namespace handshakes, not yet attached.
pub struct Handshake {
    ws: Socket,
    generation: u64,
    liveness: Duration,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("generation", &self.generation)
            .field("liveness", &self.liveness)
            .finish_non_exhaustive()
    }
}

impl Dialer {
    pub async fn handshake(self) -> Result<Handshake> {
        match timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::ConnectionLost(format!(
                "no handshake from {} within {:?}",
                self.url, self.timeout
            ))),
        }
    }

    async fn exchange(&self) -> Result<Handshake> {
        let (mut ws, _) = connect_async(self.url.as_str()).await?;
        log::info!("WebSocket connected to {}", self.url);

        let auth = self.token.as_ref().map(|t| json!({ "token": t }));
        let mut liveness = None;
        loop {
            let text = match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(SyncError::ConnectionLost("closed during handshake".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };
            match Packet::decode(&text)? {
                Packet::Open(doc) => {
                    log::debug!("engine open: {}", doc);
                    liveness = Some(liveness_window(&doc));
                    ws.send(WsMessage::Text(Packet::Connect(auth.clone()).encode())).await?;
                }
                Packet::Ping => ws.send(WsMessage::Text(Packet::Pong.encode())).await?,
                Packet::Connect(_) => {
                    if let Some(liveness) = liveness {
                        return Ok(Handshake { ws, generation: self.generation, liveness });
                    }
                    log::debug!("namespace ack before engine open");
                }
                Packet::ConnectError(doc) => {
                    return Err(SyncError::Protocol(format!("connect refused: {doc}")));
                }
                Packet::Close | Packet::Disconnect => {
                    return Err(SyncError::ConnectionLost("closed during handshake".into()));
                }
                other => log::debug!("ignoring {:?} during handshake", other),
            }
        }
    }
}

/// Silence after which the server is presumed gone: one ping interval plus
/// the ping timeout, as announced in the open packet.
fn liveness_window(open: &Value) -> Duration {
    let ms = |key: &str, default: u64| open.get(key).and_then(Value::as_u64).unwrap_or(default);
    Duration::from_millis(ms("pingInterval", 25_000) + ms("pingTimeout", 20_000))
}

pub struct TransportSession {
    url: Url,
    token: Option<String>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    handshake_timeout: Duration,
    link: Option<Link>,
}

impl TransportSession {
    pub fn new(url: Url, token: Option<String>) -> Self {
        Self {
            url,
            token,
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            link: None,
        }
    }

    /// Bounds how long [`Dialer::handshake`] waits for the server.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Opens the socket, completes the Socket.IO handshake and emits `setup`.
    ///
    /// Returns once `setup` is on the wire; [`ServerEvent::Connected`] fires
    /// later when the server acknowledges it. Any previous connection is
    /// replaced.
    pub async fn connect(&mut self, identity: &User) -> Result<()> {
        let handshake = self.dialer().handshake().await?;
        self.attach(handshake, identity)
    }

    /// Drops the current connection and prepares a new one.
    ///
    /// The returned [`Dialer`] owns everything it needs, so the handshake
    /// can run on another task while the session stays usable. Only the
    /// most recent dialer's handshake can be attached.
    pub fn dialer(&mut self) -> Dialer {
        self.teardown();
        Dialer {
            url: self.url.clone(),
            token: self.token.clone(),
            generation: self.generation.load(Ordering::SeqCst),
            timeout: self.handshake_timeout,
        }
    }

    /// Starts the reader and writer for a completed handshake and emits `setup`.
    pub fn attach(&mut self, handshake: Handshake, identity: &User) -> Result<()> {
        let Handshake { ws, generation, liveness } = handshake;
        if generation != self.generation.load(Ordering::SeqCst) {
            return Err(SyncError::ConnectionLost("handshake was superseded".into()));
        }

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, rx));
        let reader = tokio::spawn(read_loop(
            stream,
            tx.clone(),
            Arc::clone(&self.handlers),
            Arc::clone(&self.connected),
            Arc::clone(&self.generation),
            generation,
            liveness,
        ));

        tx.send(ClientEvent::Setup(identity.clone()).to_packet()?)
            .map_err(|_| SyncError::ConnectionLost("writer stopped".into()))?;
        self.link = Some(Link { outbound: tx, reader, writer });
        Ok(())
    }

    /// Registers a handler for one kind of event.
    ///
    /// Handlers run on the reader task in arrival order and must not call
    /// back into `on_event`/`unsubscribe`.
    pub fn on_event<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let mut reg = match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        reg.next_id += 1;
        let id = reg.next_id;
        reg.handlers.push((id, kind, Box::new(handler)));
        Subscription { kind, id }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut reg = match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        reg.handlers.retain(|(id, _, _)| *id != subscription.id);
    }

    /// Closes the current connection, if any. Does not raise `Disconnected`.
    pub fn disconnect(&mut self) {
        if let Some(link) = &self.link {
            let _ = link.outbound.send(Packet::Disconnect);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        // Invalidate the old reader before it can report a drop.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(link) = self.link.take() {
            link.reader.abort();
            // Dropping the sender lets the writer flush the close and exit.
            drop(link.outbound);
            drop(link.writer);
        }
    }
}

impl Outbound for TransportSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, event: ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(SyncError::NotConnected)?;
        link.outbound
            .send(event.to_packet()?)
            .map_err(|_| SyncError::ConnectionLost("writer stopped".into()))
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Packet>)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(packet) = rx.recv().await {
        let closing = matches!(packet, Packet::Disconnect);
        if let Err(e) = sink.send(WsMessage::Text(packet.encode())).await {
            log::warn!("socket write failed: {}", e);
            break;
        }
        if closing {
            let _ = sink.close().await;
            break;
        }
    }
}

async fn read_loop<S>(
    mut stream: S,
    outbound: mpsc::UnboundedSender<Packet>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    connected: Arc<AtomicBool>,
    current: Arc<AtomicU64>,
    generation: u64,
    liveness: Duration,
) where
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    let reason = loop {
        let text = match timeout(liveness, stream.next()).await {
            Err(_) => break format!("server silent for {:?}", liveness),
            Ok(Some(Ok(WsMessage::Text(text)))) => text,
            Ok(Some(Ok(WsMessage::Close(_))) | None) => break "server closed the connection".to_string(),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => break e.to_string(),
        };
        let packet = match Packet::decode(&text) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("dropping undecodable frame: {}", e);
                continue;
            }
        };
        match packet {
            Packet::Ping => {
                let _ = outbound.send(Packet::Pong);
            }
            Packet::Close | Packet::Disconnect => break "server ended the session".to_string(),
            Packet::Event { name, args } => {
                let incoming = IncomingEvent { event_type: name.clone(), data: args };
                match ServerEvent::from_incoming(incoming) {
                    Ok(Some(event)) => {
                        if current.load(Ordering::SeqCst) != generation {
                            return;
                        }
                        if event == ServerEvent::Connected {
                            connected.store(true, Ordering::SeqCst);
                        }
                        dispatch(&handlers, &event);
                    }
                    Ok(None) => log::trace!("ignoring event {:?}", name),
                    Err(e) => log::warn!("bad {:?} payload: {}", name, e),
                }
            }
            other => log::trace!("ignoring {:?}", other),
        }
    };

    if current.load(Ordering::SeqCst) != generation {
        return;
    }
    log::warn!("connection lost: {}", reason);
    connected.store(false, Ordering::SeqCst);
    dispatch(&handlers, &ServerEvent::Disconnected { reason });
}
