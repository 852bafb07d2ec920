//! Chat session controller.
//!
//! Turns session-level intent (identity, language, user text) into
//! [`ConnectionManager`] calls, and inbound payloads into typed state a
//! presentation layer can render.
//!
//! # State surface
//!
//! - ordered message history ([`ChatSession::messages`])
//! - connection status, republished from health samples
//!   ([`ChatSession::is_connected`])
//! - the current transient status, if any ([`ChatSession::status`])
//! - the language preference and its setter ([`ChatSession::set_language`])
//!
//! [`ChatSession::watch_updates`] ticks on every observable change.
//!
//! # Ordering
//!
//! Inbound decode and outbound sends both run under the session lock. A
//! send appends its optimistic echo before the lock is released, so a relay
//! acknowledgment of that message cannot be applied ahead of it.
//!
//! # Health
//!
//! Connection status is sampled every `health_poll_interval` and also
//! re-sampled whenever the manager reports an open/closed transition.

mod history;
mod reconnect;

pub use history::{Message, MessageId, Sender};
pub use reconnect::{ReconnectMode, ReconnectPolicy};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionManager, Subscription, TransportState};
use crate::constants::{DEFAULT_SERVER_URL, DEFAULT_SESSION_PATH, HEALTH_POLL_INTERVAL};
use crate::error::SessionError;
use crate::identity::SessionIdentity;
use crate::language::Language;
use crate::protocol::{self, InboundFrame, OutboundEnvelope, StatusFrame, Target};
use history::{History, MessageDraft};
use reconnect::Backoff;

/// Session parameters that do not change during its lifetime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay endpoint (`ws://host:port`).
    pub endpoint: String,
    /// Path segment before the identity.
    pub session_path: String,
    /// Health sampling cadence.
    pub health_poll_interval: Duration,
    /// Behavior when the connection drops.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SERVER_URL.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            health_poll_interval: HEALTH_POLL_INTERVAL,
            reconnect: ReconnectPolicy::Manual,
        }
    }
}

/// Transient advisory from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Text to show.
    pub content: String,
    /// Relay phase marker, e.g. `translating`.
    pub phase: Option<String>,
    /// Participant the advisory concerns.
    pub sender: Option<String>,
}

impl StatusEvent {
    fn from_frame(frame: StatusFrame) -> Option<Self> {
        let content = frame.content.filter(|content| !content.is_empty())?;
        Some(Self {
            content,
            phase: frame.status,
            sender: frame.sender,
        })
    }
}

/// Result of [`ChatSession::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Text was blank after trimming; nothing happened.
    Skipped,
    /// Transmitted; the optimistic echo carries this id.
    Sent(MessageId),
}

/// Point-in-time copy of everything a presentation layer renders.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// History in append order.
    pub messages: Vec<Message>,
    /// Last published connection status.
    pub connected: bool,
    /// Current advisory, if any.
    pub status: Option<StatusEvent>,
    /// Current language preference.
    pub language: Language,
    /// Session identity.
    pub identity: SessionIdentity,
}

#[derive(Debug)]
struct SessionState {
    identity: SessionIdentity,
    language: Language,
    target: Target,
    history: History,
    status: Option<StatusEvent>,
    connected: bool,
    backoff: Backoff,
}

#[derive(Debug)]
struct SessionShared {
    manager: ConnectionManager,
    config: SessionConfig,
    state: Mutex<SessionState>,
    updates: watch::Sender<u64>,
}

/// A live chat session bound to a [`ConnectionManager`].
///
/// Dropping the session (or calling [`ChatSession::shutdown`]) stops
/// polling and unsubscribes, but leaves the connection open so a new
/// session on the same manager picks it up.
#[derive(Debug)]
pub struct ChatSession {
    shared: Arc<SessionShared>,
    subscription: Option<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatSession {
    /// Start a session: subscribe to inbound payloads, connect to the
    /// (identity, language) target unless already connected to it, and
    /// start health sampling.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(
        manager: ConnectionManager,
        config: SessionConfig,
        identity: SessionIdentity,
        language: Language,
    ) -> Result<Self, SessionError> {
        let target = Target::new(&config.endpoint, &config.session_path, &identity, language)?;
        let (updates, _) = watch::channel(0);

        let shared = Arc::new(SessionShared {
            manager,
            config,
            state: Mutex::new(SessionState {
                identity,
                language,
                target,
                history: History::default(),
                status: None,
                connected: false,
                backoff: Backoff::new(),
            }),
            updates,
        });

        let weak = Arc::downgrade(&shared);
        let subscription = shared.manager.on_message(move |raw| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_inbound(raw);
            }
        });

        {
            let state = shared.lock();
            shared.ensure_connected(&state);
        }
        shared.sample_health();

        let tasks = vec![
            tokio::spawn(run_health_poll(
                Arc::downgrade(&shared),
                shared.config.health_poll_interval,
            )),
            tokio::spawn(run_health_push(
                Arc::downgrade(&shared),
                shared.manager.watch_connected(),
            )),
        ];

        Ok(Self {
            shared,
            subscription: Some(subscription),
            tasks,
        })
    }

    /// Send user text.
    ///
    /// Blank text is skipped. When the connection is not open, returns
    /// [`SessionError::Unavailable`] without touching history. Otherwise the
    /// envelope is queued and the optimistic echo appended.
    pub fn send_message(&self, text: &str) -> Result<SendOutcome, SessionError> {
        if text.trim().is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let mut state = self.shared.lock();
        if let Err(e) = self.shared.manager.send(&OutboundEnvelope::new(text).to_json()) {
            log::warn!("[Session] Message not sent: {}", e);
            return Err(SessionError::Unavailable);
        }
        let draft = MessageDraft::local(text);
        let id = draft.id().clone();
        state.history.append(draft);
        drop(state);

        self.shared.notify();
        Ok(SendOutcome::Sent(id))
    }

    /// Switch language; reconnects against the new target if it changed.
    pub fn set_language(&self, language: Language) -> Result<(), SessionError> {
        let mut state = self.shared.lock();
        if state.language == language {
            return Ok(());
        }
        let target = self.shared.target_for(&state.identity, language)?;
        log::info!("[Session] Language {} -> {}", state.language, language);
        state.language = language;
        self.shared.retarget(&mut state, target);
        drop(state);

        self.shared.notify();
        Ok(())
    }

    /// Switch identity; reconnects against the new target if it changed.
    pub fn set_identity(&self, identity: SessionIdentity) -> Result<(), SessionError> {
        let mut state = self.shared.lock();
        if state.identity == identity {
            return Ok(());
        }
        let target = self.shared.target_for(&identity, state.language)?;
        log::info!("[Session] Identity {} -> {}", state.identity, identity);
        state.identity = identity;
        self.shared.retarget(&mut state, target);
        drop(state);

        self.shared.notify();
        Ok(())
    }

    /// Explicit reconnect to the current target (no-op if already live).
    pub fn reconnect(&self) {
        let mut state = self.shared.lock();
        state.backoff.reset();
        self.shared.ensure_connected(&state);
    }

    /// History in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().history.messages().to_vec()
    }

    /// Number of messages in history.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.shared.lock().history.len()
    }

    /// Current advisory, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusEvent> {
        self.shared.lock().status.clone()
    }

    /// Last published connection status.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Current language preference.
    #[must_use]
    pub fn language(&self) -> Language {
        self.shared.lock().language
    }

    /// Session identity.
    #[must_use]
    pub fn identity(&self) -> SessionIdentity {
        self.shared.lock().identity.clone()
    }

    /// Target the session wants to be connected to.
    #[must_use]
    pub fn target(&self) -> Target {
        self.shared.lock().target.clone()
    }

    /// Everything a presentation layer needs, copied under one lock.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.lock();
        SessionSnapshot {
            messages: state.history.messages().to_vec(),
            connected: state.connected,
            status: state.status.clone(),
            language: state.language,
            identity: state.identity.clone(),
        }
    }

    /// Receiver whose value changes on every observable state change.
    #[must_use]
    pub fn watch_updates(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    /// Stop polling and unsubscribe. The connection stays open.
    pub fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            log::debug!("[Session] Unsubscribed from inbound messages");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.updates.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn target_for(
        &self,
        identity: &SessionIdentity,
        language: Language,
    ) -> Result<Target, SessionError> {
        Ok(Target::new(
            &self.config.endpoint,
            &self.config.session_path,
            identity,
            language,
        )?)
    }

    fn retarget(&self, state: &mut SessionState, target: Target) {
        state.target = target;
        state.backoff.reset();
        self.ensure_connected(state);
    }

    /// Connect unless the manager is already live for the session target.
    ///
    /// Callers hold the session lock, which serializes target changes.
    fn ensure_connected(&self, state: &SessionState) {
        if !self.manager.is_live_for(&state.target) {
            self.manager.connect(&state.target);
        }
    }

    /// Apply one inbound payload.
    fn handle_inbound(&self, raw: &str) {
        let mut state = self.lock();
        match protocol::decode(raw) {
            Ok(InboundFrame::Status(frame)) => {
                state.status = StatusEvent::from_frame(frame);
            }
            Ok(InboundFrame::Chat(frame)) => {
                state.status = None;
                state.history.append(MessageDraft::from_chat(frame));
            }
            Err(malformed) => {
                log::debug!("[Session] Showing payload verbatim: {}", malformed);
                state.history.append(MessageDraft::fallback(raw));
            }
        }
        drop(state);
        self.notify();
    }

    /// Republish connection status and apply the reconnect policy.
    fn sample_health(&self) {
        let connected = self.manager.is_connected();
        let mut state = self.lock();
        let changed = state.connected != connected;
        state.connected = connected;

        if connected {
            state.backoff.reset();
        } else if self.manager.state() == TransportState::Closed
            && state
                .backoff
                .should_retry(self.config.reconnect, tokio::time::Instant::now())
        {
            log::info!("[Session] Reconnecting to {}", state.target);
            self.manager.connect(&state.target);
        }
        drop(state);

        if changed {
            log::debug!("[Session] Connection status: {}", if connected { "up" } else { "down" });
            self.notify();
        }
    }
}

/// Sample health on a fixed cadence until the session is gone.
async fn run_health_poll(shared: Weak<SessionShared>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.sample_health();
    }
}

/// Re-sample immediately whenever the manager reports a transition.
async fn run_health_push(shared: Weak<SessionShared>, mut connected: watch::Receiver<bool>) {
    while connected.changed().await.is_ok() {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.sample_health();
    }
}
