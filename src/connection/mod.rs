//! Single-transport connection manager.
//!
//! Owns at most one live transport at a time and decouples transport churn
//! from the subscribers interested in inbound payloads.
//!
//! # Architecture
//!
//! ```text
//!   ConnectionManager (handle, Clone)          transport task (per connect)
//!         │                                            │
//!         │  connect(target) ── spawn ───────────────► │ Connector::connect(url)
//!         │  send(payload)   ── TransportCommand ────► │ writer.send_text
//!         │  disconnect()    ── TransportCommand ────► │ writer.send_close
//!         │                                            │
//!         │  ◄── state transitions (Opening/Open/Closed, by generation)
//!         │  ◄── dispatch(payload) ─► Subscribers (fan-out, arrival order)
//! ```
//!
//! # Lifecycle
//!
//! `Idle → Opening → Open → Closed`. The manager never reconnects on its
//! own. Each transport is stamped with a generation number; a task whose
//! generation has been superseded can no longer change state or dispatch.

mod subscribers;

pub use subscribers::{MessageHandler, Subscription};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::error::ConnectionError;
use crate::protocol::Target;
use crate::ws::{Connector, TungsteniteConnector, WsMessage};
use subscribers::Subscribers;

/// Lifecycle state of the current transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No transport has been requested (or it was disconnected).
    #[default]
    Idle,
    /// Handshake in progress.
    Opening,
    /// Ready to send and receive.
    Open,
    /// Handshake failed, remote closed, or transport errored.
    Closed,
}

impl TransportState {
    /// `Opening` or `Open`.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Opening | Self::Open)
    }
}

/// Command from the manager to a transport task.
#[derive(Debug)]
enum TransportCommand {
    /// Write a text frame.
    Text(String),
    /// Close the transport and exit.
    Close,
}

/// Bookkeeping for the transport the manager currently owns.
#[derive(Debug)]
struct ActiveTransport {
    generation: u64,
    target: Target,
    state: TransportState,
    command_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl ActiveTransport {
    fn close(self) {
        log::debug!(
            "[Connection] Closing transport #{} to {}",
            self.generation,
            self.target
        );
        let _ = self.command_tx.send(TransportCommand::Close);
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    generation: u64,
    active: Option<ActiveTransport>,
    last_error: Option<ConnectionError>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ManagerState>,
    subscribers: Subscribers,
    connector: Arc<dyn Connector>,
    connected_tx: watch::Sender<bool>,
}

/// Handle to the connection manager.
///
/// Cheap to clone; every clone drives the same transport. Construct one
/// per client and hand it to the session.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Manager that opens real WebSocket connections.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TungsteniteConnector))
    }

    /// Manager that opens transports through `connector`.
    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ManagerState::default()),
                subscribers: Subscribers::default(),
                connector,
                connected_tx,
            }),
        }
    }

    /// Ensure a transport to `target` is open or opening.
    ///
    /// No-op when the current transport already addresses `target` and is
    /// `Opening` or `Open`. Otherwise any existing transport is closed
    /// (whatever its target) and a new one is started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, target: &Target) {
        let mut state = self.lock();
        if let Some(active) = &state.active {
            if active.target == *target && active.state.is_live() {
                log::debug!(
                    "[Connection] Already {:?} to {}, ignoring connect",
                    active.state,
                    target
                );
                return;
            }
        }

        if let Some(previous) = state.active.take() {
            previous.close();
        }

        state.generation += 1;
        state.last_error = None;
        let generation = state.generation;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        state.active = Some(ActiveTransport {
            generation,
            target: target.clone(),
            state: TransportState::Opening,
            command_tx,
        });
        self.shared.connected_tx.send_replace(false);
        drop(state);

        log::info!("[Connection] Connecting to {} (#{})", target, generation);
        tokio::spawn(run_transport(
            Arc::clone(&self.shared),
            generation,
            target.url().to_string(),
            command_rx,
        ));
    }

    /// Transmit `payload` over the open transport.
    ///
    /// Returns [`ConnectionError::Unavailable`] unless the transport is
    /// `Open`. Frames are written in call order.
    pub fn send(&self, payload: &str) -> Result<(), ConnectionError> {
        let state = self.lock();
        match &state.active {
            Some(active) if active.state == TransportState::Open => active
                .command_tx
                .send(TransportCommand::Text(payload.to_string()))
                .map_err(|_closed| ConnectionError::Unavailable),
            _ => {
                log::warn!("[Connection] Cannot send: transport is not open");
                Err(ConnectionError::Unavailable)
            }
        }
    }

    /// Register `handler` for every inbound payload.
    ///
    /// All registered handlers receive every payload in arrival order.
    /// The returned [`Subscription`] removes exactly this handler when
    /// unsubscribed or dropped. Registrations survive transport changes.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(Arc::new(handler))
    }

    /// Whether the transport is fully open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Lifecycle state of the current transport.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.lock()
            .active
            .as_ref()
            .map_or(TransportState::Idle, |active| active.state)
    }

    /// Target of the current transport, if any.
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        self.lock().active.as_ref().map(|active| active.target.clone())
    }

    /// Whether the current transport addresses `target` and is `Opening`
    /// or `Open`.
    #[must_use]
    pub fn is_live_for(&self, target: &Target) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|active| active.target == *target && active.state.is_live())
    }

    /// Why the current transport closed, if it failed.
    ///
    /// Cleared by the next [`connect`](Self::connect). A remote close or a
    /// local disconnect is not an error.
    #[must_use]
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.lock().last_error.clone()
    }

    /// Close the transport if present and return to `Idle`. Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        if let Some(active) = state.active.take() {
            log::info!("[Connection] Disconnecting from {}", active.target);
            active.close();
        }
        self.shared.connected_tx.send_replace(false);
    }

    /// Receiver notified on every change of the "fully open" flag.
    #[must_use]
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    /// Number of registered inbound handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.shared.lock()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move transport `generation` to `next`.
    ///
    /// Returns `false` (and changes nothing) if that transport has been
    /// superseded or disconnected.
    fn transition(&self, generation: u64, next: TransportState) -> bool {
        let mut state = self.lock();
        match state.active.as_mut() {
            Some(active) if active.generation == generation => {
                active.state = next;
                self.connected_tx
                    .send_replace(next == TransportState::Open);
                true
            }
            _ => false,
        }
    }

    /// Record `error` for transport `generation` and move it to `Closed`.
    fn fail(&self, generation: u64, error: &anyhow::Error) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(active) = state
            .active
            .as_mut()
            .filter(|active| active.generation == generation)
        {
            active.state = TransportState::Closed;
            state.last_error = Some(ConnectionError::Transport(format!("{error:#}")));
            self.connected_tx.send_replace(false);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Fan `payload` out to subscribers, unless `generation` is stale.
    fn dispatch(&self, generation: u64, payload: &str) {
        if self.is_current(generation) {
            self.subscribers.dispatch(payload);
        } else {
            log::trace!("[Connection] Dropping frame from superseded transport #{}", generation);
        }
    }
}

/// Drive one transport from handshake to close.
///
/// Inbound frames are dispatched from this task only, which preserves
/// arrival order. Returns when the transport closes, errors, or is told to
/// close.
async fn run_transport(
    shared: Arc<Shared>,
    generation: u64,
    url: String,
    mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
) {
    let mut transport = match shared.connector.connect(&url).await {
        Ok(transport) => transport,
        Err(e) => {
            log::warn!("[Connection] Handshake with {} failed: {:#}", url, e);
            shared.fail(generation, &e);
            return;
        }
    };

    if !shared.transition(generation, TransportState::Open) {
        log::debug!("[Connection] Transport #{} superseded during handshake", generation);
        let _ = transport.writer.send_close().await;
        return;
    }
    log::info!("[Connection] Connected to {} (#{})", url, generation);

    loop {
        tokio::select! {
            frame = transport.reader.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => shared.dispatch(generation, &text),
                    Some(Ok(WsMessage::Binary(data))) => {
                        shared.dispatch(generation, &String::from_utf8_lossy(&data));
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Pings are auto-replied by tungstenite; ignore pongs
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!(
                            "[Connection] Closed by server: code {} {:?} (#{})",
                            code,
                            reason,
                            generation
                        );
                        shared.transition(generation, TransportState::Closed);
                        return;
                    }
                    Some(Err(e)) => {
                        log::warn!("[Connection] Transport error (#{}): {:#}", generation, e);
                        shared.fail(generation, &e);
                        return;
                    }
                    None => {
                        log::info!("[Connection] Stream ended (#{})", generation);
                        shared.transition(generation, TransportState::Closed);
                        return;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(TransportCommand::Text(text)) => {
                        if let Err(e) = transport.writer.send_text(&text).await {
                            log::warn!("[Connection] Send failed (#{}): {:#}", generation, e);
                            shared.fail(generation, &e);
                            return;
                        }
                    }
                    Some(TransportCommand::Close) | None => {
                        let _ = transport.writer.send_close().await;
                        shared.transition(generation, TransportState::Closed);
                        log::debug!("[Connection] Transport #{} closed locally", generation);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionIdentity;
    use crate::language::Language;
    use crate::ws::MemoryConnector;
    use std::time::Duration;

    fn target(lang: Language) -> Target {
        let identity = SessionIdentity::new("user_7").unwrap();
        Target::new("ws://relay", "ws", &identity, lang).unwrap()
    }

    fn manager() -> (ConnectionManager, MemoryConnector) {
        let connector = MemoryConnector::new();
        let manager = ConnectionManager::with_connector(Arc::new(connector.clone()));
        (manager, connector)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within 1s");
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let (manager, connector) = manager();
        assert_eq!(manager.state(), TransportState::Idle);
        assert!(!manager.is_connected());
        assert!(manager.target().is_none());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_reaches_open() {
        let (manager, connector) = manager();
        manager.connect(&target(Language::English));
        assert!(manager.state().is_live());

        eventually(|| manager.is_connected()).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(
            connector.last_peer().unwrap().url(),
            "ws://relay/ws/user_7?lang=eng_Latn"
        );
    }

    #[tokio::test]
    async fn test_connect_same_target_is_idempotent() {
        let (manager, connector) = manager();
        let t = target(Language::English);

        manager.connect(&t);
        manager.connect(&t);
        eventually(|| manager.is_connected()).await;
        manager.connect(&t);
        manager.connect(&t);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(connector.connect_count(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_new_target_closes_previous_transport() {
        let (manager, connector) = manager();
        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;

        manager.connect(&target(Language::Spanish));
        eventually(|| manager.is_connected()).await;

        let peers = connector.peers();
        assert_eq!(peers.len(), 2);
        eventually(|| peers[0].is_closed()).await;
        assert!(!peers[1].is_closed());
        assert!(peers[1].url().ends_with("lang=spa_Latn"));
        assert_eq!(manager.target(), Some(target(Language::Spanish)));
    }

    #[tokio::test]
    async fn test_send_requires_open_transport() {
        let (manager, connector) = manager();
        assert_eq!(manager.send("x"), Err(ConnectionError::Unavailable));

        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        manager.send("first").unwrap();
        manager.send("second").unwrap();

        let peer = connector.last_peer().unwrap();
        eventually(|| peer.written().len() == 2).await;
        assert_eq!(peer.written(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_send_while_opening_is_unavailable() {
        let (manager, connector) = manager();
        connector.hold_handshakes();
        manager.connect(&target(Language::English));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.state(), TransportState::Opening);
        assert_eq!(manager.send("early"), Err(ConnectionError::Unavailable));

        connector.release_handshakes();
        eventually(|| manager.is_connected()).await;
        manager.send("late").unwrap();

        let peer = connector.last_peer().unwrap();
        eventually(|| !peer.written().is_empty()).await;
        assert_eq!(peer.written(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_inbound_fan_out_in_order() {
        let (manager, connector) = manager();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen_a), Arc::clone(&seen_b));
        let _sub_a = manager.on_message(move |p| a.lock().unwrap().push(p.to_string()));
        let _sub_b = manager.on_message(move |p| b.lock().unwrap().push(p.to_string()));

        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        let peer = connector.last_peer().unwrap();
        for n in 0..5 {
            peer.push_text(&n.to_string());
        }
        peer.push(WsMessage::Binary(b"bytes".to_vec()));
        peer.push(WsMessage::Ping(vec![1]));

        eventually(|| seen_b.lock().unwrap().len() == 6).await;
        let expected = vec!["0", "1", "2", "3", "4", "bytes"];
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_remote_close_moves_to_closed_without_reconnect() {
        let (manager, connector) = manager();
        let mut connected = manager.watch_connected();
        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        assert!(*connected.borrow_and_update());

        connector.last_peer().unwrap().close(1000, "bye");
        eventually(|| manager.state() == TransportState::Closed).await;

        assert!(!*connected.borrow_and_update());
        assert_eq!(manager.last_error(), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.send("x"), Err(ConnectionError::Unavailable));
    }

    #[tokio::test]
    async fn test_reconnect_after_close_opens_new_transport() {
        let (manager, connector) = manager();
        let t = target(Language::English);
        manager.connect(&t);
        eventually(|| manager.is_connected()).await;
        connector.last_peer().unwrap().close(1006, "gone");
        eventually(|| manager.state() == TransportState::Closed).await;

        manager.connect(&t);
        eventually(|| manager.is_connected()).await;
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_closed_not_fatal() {
        let (manager, connector) = manager();
        connector.set_refuse(true);
        manager.connect(&target(Language::English));
        eventually(|| manager.state() == TransportState::Closed).await;

        let Some(ConnectionError::Transport(reason)) = manager.last_error() else {
            panic!("expected transport error");
        };
        assert!(reason.contains("connection refused"));

        connector.set_refuse(false);
        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        assert_eq!(manager.last_error(), None);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (manager, connector) = manager();
        manager.disconnect();

        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        manager.disconnect();
        manager.disconnect();

        assert_eq!(manager.state(), TransportState::Idle);
        let peer = connector.last_peer().unwrap();
        eventually(|| peer.is_closed()).await;
    }

    #[tokio::test]
    async fn test_superseded_transport_frames_are_not_dispatched() {
        let (manager, connector) = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = manager.on_message(move |p| sink.lock().unwrap().push(p.to_string()));

        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        let old = connector.last_peer().unwrap();
        manager.connect(&target(Language::French));
        eventually(|| manager.is_connected()).await;
        let new = connector.last_peer().unwrap();

        old.push_text("stale");
        new.push_text("fresh");

        eventually(|| !seen.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_stops_receiving() {
        let (manager, connector) = manager();
        let seen = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&seen);
        let sub = manager.on_message(move |_| *counter.lock().unwrap() += 1);
        assert_eq!(manager.subscriber_count(), 1);

        manager.connect(&target(Language::English));
        eventually(|| manager.is_connected()).await;
        let peer = connector.last_peer().unwrap();
        peer.push_text("one");
        eventually(|| *seen.lock().unwrap() == 1).await;

        assert!(sub.unsubscribe());
        assert_eq!(manager.subscriber_count(), 0);
        peer.push_text("two");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
