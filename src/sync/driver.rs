//! Event loop around [`SyncController`].
//!
//! Everything the controller does happens on this one task, one event at a
//! time: inbound socket events, presentation intents, resolved REST calls
//! and timers. REST calls and socket handshakes run on spawned tasks and
//! report back over channels, so the loop keeps serving events while they
//! are in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::api::client::{MessageApi, SentMessage};
use crate::api::events::{EventKind, ServerEvent};
use crate::api::models::{ConversationId, CorrelationId, Message, User};
use crate::app::ReconnectPolicy;
use crate::error::{Result, SyncError};
use crate::sync::controller::{ChatView, HistoryTicket, Notice, PendingSend, SyncController};
use crate::transport::{Handshake, TransportSession};

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Select(ConversationId),
    Leave,
    Keystroke,
    Send(String),
    Discard(CorrelationId),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutput {
    Notice(Notice),
    /// A message arrived for a conversation that is not open.
    RefreshChats,
    /// A send intent was refused before anything was listed.
    SendRejected(String),
}

/// Presentation-side ends of the driver's channels.
pub struct SyncHandle {
    intents: mpsc::UnboundedSender<Intent>,
    pub view: watch::Receiver<ChatView>,
    pub outputs: mpsc::UnboundedReceiver<SyncOutput>,
}

impl SyncHandle {
    pub fn intent(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| SyncError::ConnectionLost("sync loop has stopped".into()))
    }

    pub fn select(&self, conversation: ConversationId) -> Result<()> {
        self.intent(Intent::Select(conversation))
    }

    pub fn keystroke(&self) -> Result<()> {
        self.intent(Intent::Keystroke)
    }

    pub fn send_text(&self, body: impl Into<String>) -> Result<()> {
        self.intent(Intent::Send(body.into()))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.intent(Intent::Shutdown)
    }
}

pub struct SyncDriver<A> {
    controller: SyncController<TransportSession>,
    api: Arc<A>,
    policy: ReconnectPolicy,
    intents: mpsc::UnboundedReceiver<Intent>,
    view_tx: watch::Sender<ChatView>,
    outputs: mpsc::UnboundedSender<SyncOutput>,
}

impl<A: MessageApi> SyncDriver<A> {
    pub fn new(
        transport: TransportSession,
        api: Arc<A>,
        user: User,
        typing_window: Duration,
        policy: ReconnectPolicy,
    ) -> (Self, SyncHandle) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ChatView::default());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let driver = Self {
            controller: SyncController::new(transport, user, typing_window),
            api,
            policy,
            intents: intent_rx,
            view_tx,
            outputs: out_tx,
        };
        let handle = SyncHandle { intents: intent_tx, view: view_rx, outputs: out_rx };
        (driver, handle)
    }

    /// Connects and runs until [`Intent::Shutdown`] or every handle is dropped.
    ///
    /// Connection failures never end the loop: they are reported as notices
    /// and retried according to the [`ReconnectPolicy`].
    pub async fn run(self) -> Result<()> {
        let SyncDriver { mut controller, api, policy, mut intents, view_tx, outputs } = self;

        let (inbound_tx, mut inbound) = mpsc::unbounded_channel::<ServerEvent>();
        for kind in [
            EventKind::Connected,
            EventKind::MessageReceived,
            EventKind::Typing,
            EventKind::StopTyping,
            EventKind::Disconnected,
        ] {
            let tx = inbound_tx.clone();
            controller.transport().on_event(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }

        let (history_tx, mut history_rx) = mpsc::unbounded_channel::<(HistoryTicket, Result<Vec<Message>>)>();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel::<(PendingSend, Result<SentMessage>)>();
        let (dial_tx, mut dial_rx) = mpsc::unbounded_channel::<Result<Handshake>>();

        let user = controller.user().clone();
        let mut dialing = Some(dial(controller.transport_mut(), &dial_tx));
        let mut reconnect_at: Option<Instant> = None;
        let mut failures: u32 = 0;

        loop {
            let presence_deadline = controller.presence_deadline();
            tokio::select! {
                Some(event) = inbound.recv() => {
                    match &event {
                        ServerEvent::Connected => {
                            failures = 0;
                            reconnect_at = None;
                        }
                        ServerEvent::Disconnected { .. } => {
                            let delay = policy.delay_for(failures);
                            log::info!("reconnecting in {:?}", delay);
                            reconnect_at = Some(Instant::now() + delay);
                        }
                        _ => {}
                    }
                    controller.handle_event(event);
                }
                Some(result) = dial_rx.recv() => {
                    dialing = None;
                    let attached = result.and_then(|handshake| controller.transport_mut().attach(handshake, &user));
                    if let Err(e) = attached {
                        failures += 1;
                        controller.connect_failed(&e.to_string());
                        if policy.exhausted(failures) {
                            controller.reconnect_abandoned(failures);
                        } else {
                            let delay = policy.delay_for(failures - 1);
                            log::info!("retrying connection in {:?} (attempt {})", delay, failures + 1);
                            reconnect_at = Some(Instant::now() + delay);
                        }
                    }
                }
                intent = intents.recv() => match intent {
                    None | Some(Intent::Shutdown) => break,
                    Some(Intent::Select(conversation)) => {
                        let ticket = controller.select_conversation(conversation);
                        let api = Arc::clone(&api);
                        let tx = history_tx.clone();
                        tokio::spawn(async move {
                            let result = api.fetch_messages(&ticket.conversation).await;
                            let _ = tx.send((ticket, result));
                        });
                    }
                    Some(Intent::Leave) => controller.leave_conversation(),
                    Some(Intent::Keystroke) => controller.keystroke(Instant::now()),
                    Some(Intent::Send(body)) => match controller.send_text(&body) {
                        Ok(send) => {
                            let api = Arc::clone(&api);
                            let tx = sent_tx.clone();
                            tokio::spawn(async move {
                                let result = api
                                    .send_message(&send.body, &send.conversation, Some(send.correlation))
                                    .await;
                                let _ = tx.send((send, result));
                            });
                        }
                        Err(e) => {
                            log::debug!("send refused: {}", e);
                            let _ = outputs.send(SyncOutput::SendRejected(e.to_string()));
                        }
                    },
                    Some(Intent::Discard(correlation)) => {
                        controller.discard_pending(correlation);
                    }
                },
                Some((ticket, result)) = history_rx.recv() => {
                    controller.apply_history(ticket, result);
                }
                Some((send, result)) = sent_rx.recv() => {
                    controller.complete_send(send, result);
                }
                _ = sleep_opt(presence_deadline) => {
                    controller.poll_presence(Instant::now());
                }
                _ = sleep_opt(reconnect_at) => {
                    reconnect_at = None;
                    if dialing.is_none() {
                        dialing = Some(dial(controller.transport_mut(), &dial_tx));
                    }
                }
            }
            publish(&mut controller, &view_tx, &outputs);
        }

        if let Some(task) = dialing {
            task.abort();
        }
        controller.transport_mut().disconnect();
        Ok(())
    }
}

/// Starts a handshake off the loop; the result comes back on `tx`.
fn dial(transport: &mut TransportSession, tx: &mpsc::UnboundedSender<Result<Handshake>>) -> JoinHandle<()> {
    let dialer = transport.dialer();
    let tx = tx.clone();
    tokio::spawn(async move {
        let _ = tx.send(dialer.handshake().await);
    })
}

fn publish(
    controller: &mut SyncController<TransportSession>,
    view_tx: &watch::Sender<ChatView>,
    outputs: &mpsc::UnboundedSender<SyncOutput>,
) {
    if let Some(view) = controller.take_view() {
        view_tx.send_replace(view);
    }
    for notice in controller.take_notices() {
        let _ = outputs.send(SyncOutput::Notice(notice));
    }
    if controller.take_refresh_request() {
        let _ = outputs.send(SyncOutput::RefreshChats);
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
