//! Wire protocol between the client and the translation relay.
//!
//! # Addressing
//!
//! One connection per (identity, language):
//!
//! ```text
//! ws://<host>/<session-path>/<identity>?lang=<tag>
//! ```
//!
//! # Envelopes
//!
//! Outbound: `{"content": "<text>"}`.
//!
//! Inbound frames are either a status advisory
//! (`{"type": "status", "content": ...}`) or a chat frame carrying a sender
//! plus some combination of `content`, `translated` and `original`. Anything
//! else is a [`MalformedFrame`] and is shown verbatim by the session.

use serde::Deserialize;

use crate::constants::{LANGUAGE_QUERY_PARAM, STATUS_FRAME_TYPE};
use crate::error::{ConnectionError, MalformedFrame};
use crate::identity::SessionIdentity;
use crate::language::Language;

/// Address of one logical connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    identity: SessionIdentity,
    language: Language,
    url: String,
}

impl Target {
    /// Build the target for `identity` and `language` on `endpoint`.
    ///
    /// `endpoint` may use `ws(s)://` or `http(s)://`; the latter is
    /// converted. Trailing slashes on the endpoint and around
    /// `session_path` are ignored.
    pub fn new(
        endpoint: &str,
        session_path: &str,
        identity: &SessionIdentity,
        language: Language,
    ) -> Result<Self, ConnectionError> {
        let endpoint = crate::ws::http_to_ws_scheme(endpoint.trim());
        let host = endpoint
            .strip_prefix("ws://")
            .or_else(|| endpoint.strip_prefix("wss://"))
            .ok_or_else(|| ConnectionError::InvalidTarget(endpoint.clone()))?;
        if host.trim_matches('/').is_empty() {
            return Err(ConnectionError::InvalidTarget(endpoint));
        }

        let base = endpoint.trim_end_matches('/');
        let path = session_path.trim_matches('/');
        let url = if path.is_empty() {
            format!("{base}/{identity}?{LANGUAGE_QUERY_PARAM}={}", language.tag())
        } else {
            format!(
                "{base}/{path}/{identity}?{LANGUAGE_QUERY_PARAM}={}",
                language.tag()
            )
        };

        Ok(Self {
            identity: identity.clone(),
            language,
            url,
        })
    }

    /// Full WebSocket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Identity this target addresses.
    #[must_use]
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Language this target addresses.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Client → relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    /// User-entered text, untrimmed.
    pub content: String,
}

impl OutboundEnvelope {
    /// Wrap user text.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Encode as the JSON text frame sent on the wire.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::json!({ "content": self.content }).to_string()
    }
}

/// Decoded relay → client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Transient advisory; never enters history.
    Status(StatusFrame),
    /// A chat message from another participant or the relay itself.
    Chat(ChatFrame),
}

/// Advisory frame (`"type": "status"`).
///
/// Fields that are absent or not strings read as `None`; a status-tagged
/// object is never malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    /// Text to show. Absent means "clear the status".
    pub content: Option<String>,
    /// Relay phase marker (`loading_model`, `loaded`, `translating`).
    pub status: Option<String>,
    /// Participant the advisory concerns, if any.
    pub sender: Option<String>,
}

impl StatusFrame {
    fn from_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let text = |key: &str| {
            object
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        Self {
            content: text("content"),
            status: text("status"),
            sender: text("sender"),
        }
    }
}

/// Chat frame. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatFrame {
    /// Participant id, or `System` for relay notices.
    pub sender: String,
    /// Text as the sender wrote it (used when no translation is present).
    #[serde(default)]
    pub content: Option<String>,
    /// Text translated into this client's language.
    #[serde(default)]
    pub translated: Option<String>,
    /// Source text of a translation.
    #[serde(default)]
    pub original: Option<String>,
    /// Relay-assigned id.
    #[serde(default)]
    pub id: Option<FrameId>,
    /// Language the relay translated into.
    #[serde(default)]
    pub target_lang: Option<String>,
    /// Translation latency reported by the relay, in milliseconds.
    #[serde(default)]
    pub latency_ms: Option<f64>,
}

impl ChatFrame {
    /// Text to display: the translation when non-empty, else the content,
    /// else the original.
    #[must_use]
    pub fn display_text(&self) -> Option<&str> {
        [&self.translated, &self.content, &self.original]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|text| !text.is_empty())
    }
}

/// Relay ids arrive as strings or numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameId {
    /// `"id": "1712345678.123"`
    Text(String),
    /// `"id": 42`
    Number(serde_json::Number),
}

impl FrameId {
    /// The id as a string, `None` when empty.
    #[must_use]
    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Text(text) if text.is_empty() => None,
            Self::Text(text) => Some(text),
            Self::Number(number) => Some(number.to_string()),
        }
    }
}

/// Decode a raw inbound payload.
///
/// Any structural mismatch (not JSON, not an object, chat frame without a
/// sender or without any text) is a [`MalformedFrame`].
pub fn decode(raw: &str) -> Result<InboundFrame, MalformedFrame> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| MalformedFrame::new(raw, e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(MalformedFrame::new(raw, "not a JSON object"));
    };

    if object.get("type").and_then(serde_json::Value::as_str) == Some(STATUS_FRAME_TYPE) {
        return Ok(InboundFrame::Status(StatusFrame::from_object(object)));
    }

    let frame: ChatFrame =
        serde_json::from_value(value).map_err(|e| MalformedFrame::new(raw, e.to_string()))?;
    if frame.display_text().is_none() {
        return Err(MalformedFrame::new(raw, "chat frame has no text"));
    }
    Ok(InboundFrame::Chat(frame))
}
