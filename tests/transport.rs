mod common;

use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chat_sync::SyncError;
use chat_sync::api::events::{ClientEvent, EventKind, ServerEvent};
use chat_sync::api::models::{ConversationId, MessageId, User, UserId};
use chat_sync::api::packet::Packet;
use chat_sync::transport::{Outbound, TransportSession};

use common::{FakeServer, WAIT, wire_message};

fn user() -> User {
    User { id: UserId::new("u1"), name: "Ada".into(), token: None }
}

fn collect(session: &TransportSession, kind: EventKind) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.on_event(kind, move |ev| {
        let _ = tx.send(ev.clone());
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(WAIT, rx.recv()).await.expect("no event").expect("channel closed")
}

#[tokio::test]
async fn setup_then_connected_gates_sends() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let mut connected = collect(&session, EventKind::Connected);

    let (conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            let setup = conn.handshake().await;
            assert_eq!(setup, json!({ "_id": "u1", "name": "Ada" }));
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    let mut conn = conn;

    let refused = session.send(ClientEvent::JoinChat(ConversationId::new("c1")));
    assert!(matches!(refused, Err(SyncError::NotConnected)));
    assert!(!session.is_connected());

    conn.emit("connected", vec![]).await;
    assert_eq!(next(&mut connected).await, ServerEvent::Connected);
    assert!(session.is_connected());

    session.send(ClientEvent::JoinChat(ConversationId::new("c1"))).unwrap();
    assert_eq!(conn.expect_event("join chat").await, vec![json!("c1")]);
}

#[tokio::test]
async fn token_rides_on_namespace_connect() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), Some("secret".into()));
    let (auth, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.send_packet(Packet::Open(json!({ "sid": "s" }))).await;
            conn.recv_packet().await
        },
        async {
            // The handshake never completes in this test; only the first frame matters.
            let _ = timeout(Duration::from_millis(300), session.connect(&user())).await;
        }
    );
    assert_eq!(auth, Packet::Connect(Some(json!({ "token": "secret" }))));
}

#[tokio::test]
async fn deliveries_and_presence_reach_handlers() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let mut messages = collect(&session, EventKind::MessageReceived);
    let mut typing = collect(&session, EventKind::Typing);

    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake().await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );

    conn.emit("message recieved", vec![wire_message("m1", "c1", "u2", "hey")]).await;
    conn.emit("typing", vec![]).await;

    match next(&mut messages).await {
        ServerEvent::MessageReceived(msg) => {
            assert_eq!(msg.id, Some(MessageId::new("m1")));
            assert_eq!(msg.conversation_id, ConversationId::new("c1"));
            assert_eq!(msg.body, "hey");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(next(&mut typing).await, ServerEvent::Typing(None));
}

#[tokio::test]
async fn server_ping_is_answered() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake().await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    conn.send_packet(Packet::Ping).await;
    assert_eq!(conn.recv_packet().await, Packet::Pong);
}

#[tokio::test]
async fn dropped_connection_is_reported_and_handlers_survive_reconnect() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let mut connected = collect(&session, EventKind::Connected);
    let mut lost = collect(&session, EventKind::Disconnected);

    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake().await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    conn.emit("connected", vec![]).await;
    next(&mut connected).await;
    conn.close().await;

    assert!(matches!(next(&mut lost).await, ServerEvent::Disconnected { .. }));
    assert!(!session.is_connected());

    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake().await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    conn.emit("connected", vec![]).await;
    assert_eq!(next(&mut connected).await, ServerEvent::Connected);
    assert!(session.is_connected());
}

#[tokio::test]
async fn local_disconnect_is_silent() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let mut lost = collect(&session, EventKind::Disconnected);

    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake().await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    conn.emit("connected", vec![]).await;
    // Wait until the session saw the ack.
    timeout(WAIT, async {
        while !session.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    session.disconnect();
    assert_eq!(conn.recv_packet().await, Packet::Disconnect);
    assert!(!session.is_connected());
    assert!(timeout(Duration::from_millis(200), lost.recv()).await.is_err());
    assert!(matches!(
        session.send(ClientEvent::Typing(ConversationId::new("c1"))),
        Err(SyncError::NotConnected)
    ));
}

#[tokio::test]
async fn unsubscribed_handler_stops_firing() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = session.on_event(EventKind::StopTyping, move |ev| {
        let _ = tx.send(ev.clone());
    });
    let mut kept = collect(&session, EventKind::StopTyping);

    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake().await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    session.unsubscribe(sub);
    conn.emit("stop typing", vec![json!("c1")]).await;
    assert_eq!(
        next(&mut kept).await,
        ServerEvent::StopTyping(Some(ConversationId::new("c1")))
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn silent_server_counts_as_dropped() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let mut lost = collect(&session, EventKind::Disconnected);

    let (mut conn, ()) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.handshake_with_pings(100, 100).await;
            conn
        },
        async { session.connect(&user()).await.unwrap() }
    );
    conn.emit("connected", vec![]).await;

    // The socket stays open but nothing more is sent.
    match next(&mut lost).await {
        ServerEvent::Disconnected { reason } => assert!(reason.contains("silent"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!session.is_connected());
    drop(conn);
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    let mut server = FakeServer::start().await;
    let mut session =
        TransportSession::new(server.url.clone(), None).with_handshake_timeout(Duration::from_millis(200));
    let u = user();
    let (_conn, result) = tokio::join!(server.accept(), session.connect(&u));
    assert!(matches!(result, Err(SyncError::ConnectionLost(_))));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn superseded_handshake_is_not_attached() {
    let mut server = FakeServer::start().await;
    let mut session = TransportSession::new(server.url.clone(), None);
    let first = session.dialer();
    let _second = session.dialer();

    let (_conn, handshake) = tokio::join!(
        async {
            let mut conn = server.accept().await;
            conn.send_packet(Packet::Open(json!({ "sid": "s" }))).await;
            conn.recv_packet().await;
            conn.send_packet(Packet::Connect(None)).await;
            conn
        },
        first.handshake()
    );
    let attached = session.attach(handshake.unwrap(), &user());
    assert!(matches!(attached, Err(SyncError::ConnectionLost(_))));
}
