// End-to-end tests against a loopback relay speaking the real WebSocket
// protocol. The relay echoes each chat message back as a "translated"
// frame preceded by a status frame, and announces joins as `System`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsFrame;

use tongues::session::ReconnectPolicy;
use tongues::{
    ChatSession, ConnectionManager, Language, SendOutcome, Sender, SessionConfig, SessionError,
    SessionIdentity,
};

struct Relay {
    addr: SocketAddr,
    paths: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    kick: watch::Sender<bool>,
}

impl Relay {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let live = Arc::new(AtomicUsize::new(0));
        let (kick, kick_rx) = watch::channel(false);

        let (accept_paths, accept_live) = (Arc::clone(&paths), Arc::clone(&live));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&accept_paths),
                    Arc::clone(&accept_live),
                    kick_rx.clone(),
                ));
            }
        });

        Self {
            addr,
            paths,
            live,
            kick,
        }
    }

    fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Close every open connection from the server side.
    fn kick_all(&self) {
        self.kick.send_replace(true);
    }
}

async fn serve(
    stream: TcpStream,
    paths: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    mut kick: watch::Receiver<bool>,
) {
    // Only kicks issued after this connection was accepted apply to it
    kick.borrow_and_update();

    let mut uri = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri = request.uri().to_string();
        Ok(response)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    paths.lock().unwrap().push(uri.clone());
    live.fetch_add(1, Ordering::SeqCst);

    let (path, query) = uri.split_once('?').unwrap_or((uri.as_str(), ""));
    let client_id = path.rsplit('/').next().unwrap_or_default().to_string();
    let lang = query.strip_prefix("lang=").unwrap_or("eng_Latn").to_string();

    let (mut tx, mut rx) = ws.split();
    let joined = json!({ "sender": "System", "content": format!("Client #{client_id} joined") });
    let _ = tx.send(WsFrame::Text(joined.to_string())).await;

    let mut seq = 0;
    loop {
        tokio::select! {
            frame = rx.next() => match frame {
                Some(Ok(WsFrame::Text(text))) => {
                    let content = serde_json::from_str::<Value>(&text)
                        .ok()
                        .and_then(|v| v["content"].as_str().map(str::to_string))
                        .unwrap_or_default();
                    seq += 1;
                    let status = json!({ "type": "status", "status": "translating", "content": "Translating..." });
                    let chat = json!({
                        "sender": client_id,
                        "content": content,
                        "translated": format!("[{lang}] {content}"),
                        "original": content,
                        "id": seq,
                        "target_lang": lang,
                        "latency_ms": 12.5,
                    });
                    let _ = tx.send(WsFrame::Text(status.to_string())).await;
                    let _ = tx.send(WsFrame::Text(chat.to_string())).await;
                }
                Some(Ok(WsFrame::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = kick.changed() => {
                let _ = tx.send(WsFrame::Close(None)).await;
                break;
            }
        }
    }

    live.fetch_sub(1, Ordering::SeqCst);
}

fn session_config(endpoint: String) -> SessionConfig {
    SessionConfig {
        endpoint,
        session_path: "ws".to_string(),
        health_poll_interval: Duration::from_millis(20),
        reconnect: ReconnectPolicy::Manual,
    }
}

fn identity() -> SessionIdentity {
    SessionIdentity::new("user_1a2b3c4d").unwrap()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 4s");
}

#[tokio::test]
async fn test_chat_round_trip_through_relay() {
    let relay = Relay::spawn().await;
    let session = ChatSession::attach(
        ConnectionManager::new(),
        session_config(relay.endpoint()),
        identity(),
        Language::Spanish,
    )
    .unwrap();

    eventually(|| session.is_connected()).await;
    eventually(|| !relay.paths().is_empty()).await;
    assert_eq!(relay.paths(), vec!["/ws/user_1a2b3c4d?lang=spa_Latn"]);

    eventually(|| session.message_count() == 1).await;
    let joined = &session.messages()[0];
    assert_eq!(joined.sender, Sender::System);
    assert_eq!(joined.content, "Client #user_1a2b3c4d joined");

    let outcome = session.send_message("hello").unwrap();
    assert!(matches!(outcome, SendOutcome::Sent(_)));
    eventually(|| session.message_count() == 3).await;

    let messages = session.messages();
    assert!(messages[1].is_local());
    assert_eq!(messages[1].content, "hello");

    let translated = &messages[2];
    assert_eq!(translated.sender, Sender::Participant("user_1a2b3c4d".into()));
    assert_eq!(translated.content, "[spa_Latn] hello");
    assert_eq!(translated.provenance(), Some("hello"));
    assert_eq!(translated.id.as_str(), "1");
    assert_eq!(translated.target_lang.as_deref(), Some("spa_Latn"));
    assert_eq!(translated.latency_ms, Some(12.5));

    // The status frame preceded the chat frame, which cleared it.
    assert_eq!(session.status(), None);
}

#[tokio::test]
async fn test_language_switch_replaces_connection() {
    let relay = Relay::spawn().await;
    let manager = ConnectionManager::new();
    let session = ChatSession::attach(
        manager.clone(),
        session_config(relay.endpoint()),
        identity(),
        Language::English,
    )
    .unwrap();
    eventually(|| session.is_connected()).await;
    session.send_message("before").unwrap();
    eventually(|| session.message_count() == 3).await;

    session.set_language(Language::German).unwrap();
    eventually(|| relay.paths().len() == 2).await;
    eventually(|| manager.is_connected()).await;
    eventually(|| relay.live() == 1).await;

    assert_eq!(relay.paths()[1], "/ws/user_1a2b3c4d?lang=deu_Latn");

    session.send_message("after").unwrap();
    eventually(|| {
        session
            .messages()
            .iter()
            .any(|m| m.content == "[deu_Latn] after")
    })
    .await;
    // History survives the reconnect; positions keep increasing.
    let messages = session.messages();
    assert!(messages.iter().any(|m| m.content == "[eng_Latn] before"));
    assert!(messages.windows(2).all(|w| w[0].position < w[1].position));
}

#[tokio::test]
async fn test_server_close_is_reported_and_manual_reconnect_recovers() {
    let relay = Relay::spawn().await;
    let session = ChatSession::attach(
        ConnectionManager::new(),
        session_config(relay.endpoint()),
        identity(),
        Language::English,
    )
    .unwrap();
    eventually(|| session.is_connected()).await;

    relay.kick_all();
    eventually(|| !session.is_connected()).await;
    assert!(matches!(
        session.send_message("anyone?"),
        Err(SessionError::Unavailable)
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.paths().len(), 1);

    session.reconnect();
    eventually(|| session.is_connected()).await;
    eventually(|| relay.paths().len() == 2).await;
}

#[tokio::test]
async fn test_unreachable_relay_leaves_session_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = ConnectionManager::new();
    let session = ChatSession::attach(
        manager.clone(),
        session_config(format!("ws://{addr}")),
        identity(),
        Language::English,
    )
    .unwrap();

    eventually(|| manager.state() == tongues::TransportState::Closed).await;
    assert!(!session.is_connected());
    assert!(matches!(
        session.send_message("hello"),
        Err(SessionError::Unavailable)
    ));
    assert_eq!(session.message_count(), 0);
}

#[tokio::test]
async fn test_remounted_session_reuses_connection() {
    let relay = Relay::spawn().await;
    let manager = ConnectionManager::new();

    let first = ChatSession::attach(
        manager.clone(),
        session_config(relay.endpoint()),
        identity(),
        Language::Italian,
    )
    .unwrap();
    eventually(|| first.message_count() == 1).await;
    drop(first);

    let second = ChatSession::attach(
        manager.clone(),
        session_config(relay.endpoint()),
        identity(),
        Language::Italian,
    )
    .unwrap();
    assert!(second.is_connected());

    second.send_message("ciao").unwrap();
    eventually(|| second.message_count() == 2).await;
    assert_eq!(relay.paths().len(), 1);
    assert_eq!(relay.live(), 1);
}
