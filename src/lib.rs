//! Tongues - multilingual chat session client.
//!
//! This crate keeps one live WebSocket connection to a translation relay,
//! exchanges JSON envelopes over it, and exposes a render-ready message
//! history and connection status to a presentation layer.
//!
//! # Architecture
//!
//! - **ConnectionManager** - owns at most one transport, fans inbound
//!   payloads out to subscribers, reports health
//! - **ChatSession** - owns identity and language, drives the manager,
//!   decodes frames into history and status, sends user text
//! - **ws** - the tokio-tungstenite transport behind a `Connector` seam
//!
//! # Modules
//!
//! - [`connection`] - connection lifecycle and subscriber registry
//! - [`session`] - session controller, history, reconnect policy
//! - [`protocol`] - connection target and wire frames
//! - [`config`] - configuration loading/saving
//! - [`metrics`] - relay `/metrics` and `/health` client

// Library modules
pub mod connection;
pub mod protocol;
pub mod session;
pub mod ws;

pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod language;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use connection::{ConnectionManager, Subscription, TransportState};
pub use error::{ConnectionError, IdentityError, SessionError};
pub use identity::SessionIdentity;
pub use language::Language;
pub use session::{
    ChatSession, Message, ReconnectPolicy, SendOutcome, Sender, SessionConfig, SessionSnapshot,
    StatusEvent,
};
