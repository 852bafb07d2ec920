//! Error taxonomy for the connection and session layers.
//!
//! None of these are fatal: every failure degrades to a visible state
//! (disconnected status, or a message that shows the raw payload).

use thiserror::Error;

/// Errors reported by the [`ConnectionManager`](crate::connection::ConnectionManager).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// A send was attempted while no transport is open.
    #[error("connection unavailable: no open transport")]
    Unavailable,
    /// The endpoint could not be turned into a connection target.
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
    /// Handshake, read or write failure on the underlying transport, as
    /// reported by [`ConnectionManager::last_error`](crate::connection::ConnectionManager::last_error).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors reported by the [`ChatSession`](crate::session::ChatSession).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The message was not sent because the connection is not open.
    #[error("cannot send message: connection is not open")]
    Unavailable,
    /// The session target could not be built.
    #[error(transparent)]
    Target(#[from] ConnectionError),
    /// The session identity could not be loaded, stored or validated.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Errors from identity validation and storage.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The identity is empty or contains characters unsafe for a URL path.
    #[error("invalid session identity {0:?}")]
    Invalid(String),
    /// The backing store could not be read or written.
    #[error("identity storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

/// An inbound payload that is not a well-formed frame.
///
/// Recovered locally by showing the payload verbatim; only ever logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed frame ({reason}): {}", preview(.raw))]
pub struct MalformedFrame {
    /// The payload exactly as received.
    pub raw: String,
    /// Why decoding failed.
    pub reason: String,
}

impl MalformedFrame {
    pub(crate) fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// First 80 characters of a payload, for log lines.
fn preview(raw: &str) -> String {
    raw.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_error_is_transparent() {
        let err = SessionError::from(ConnectionError::InvalidTarget("ftp://x".into()));
        assert_eq!(err.to_string(), "invalid connection target: ftp://x");
    }

    #[test]
    fn test_malformed_frame_display_truncates_payload() {
        let raw = "x".repeat(200);
        let err = MalformedFrame::new(&raw, "bad token");
        let shown = err.to_string();
        assert!(shown.starts_with("malformed frame (bad token): "));
        assert_eq!(shown.matches('x').count(), 80);
        assert_eq!(err.raw.len(), 200);
    }
}
