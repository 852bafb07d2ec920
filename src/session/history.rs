//! Append-only message history.

use chrono::{DateTime, Utc};

use crate::constants::{LOCAL_SENDER, SERVER_SENDER, SYSTEM_SENDER};
use crate::protocol::ChatFrame;

/// Opaque message id, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh locally generated id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a message is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sender {
    /// This participant (optimistic echo).
    Local,
    /// Relay notices such as joins and leaves.
    System,
    /// Payloads that could not be decoded.
    Server,
    /// Another participant, by relay-assigned id.
    Participant(String),
}

impl Sender {
    /// Map a wire `sender` value.
    #[must_use]
    pub fn from_wire(sender: &str) -> Self {
        if sender == SYSTEM_SENDER {
            Self::System
        } else {
            Self::Participant(sender.to_string())
        }
    }

    /// Marker string for this sender.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => LOCAL_SENDER,
            Self::System => SYSTEM_SENDER,
            Self::Server => SERVER_SENDER,
            Self::Participant(id) => id,
        }
    }
}

/// One entry of the chat history. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique id (relay-assigned when available).
    pub id: MessageId,
    /// Attribution.
    pub sender: Sender,
    /// Text to display (translation when one was supplied).
    pub content: String,
    /// Source text as supplied by the sender or relay.
    pub original: Option<String>,
    /// Append order; strictly increasing within a session.
    pub position: u64,
    /// When the message entered history.
    pub received_at: DateTime<Utc>,
    /// Language the relay translated into.
    pub target_lang: Option<String>,
    /// Translation latency reported by the relay.
    pub latency_ms: Option<f64>,
}

impl Message {
    /// The original text, only when it differs from what is displayed.
    #[must_use]
    pub fn provenance(&self) -> Option<&str> {
        self.original
            .as_deref()
            .filter(|original| !original.is_empty() && *original != self.content)
    }

    /// Whether this message was sent by this participant.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.sender == Sender::Local
    }
}

/// A message before it is given a position.
#[derive(Debug, Clone)]
pub(crate) struct MessageDraft {
    id: MessageId,
    sender: Sender,
    content: String,
    original: Option<String>,
    target_lang: Option<String>,
    latency_ms: Option<f64>,
}

impl MessageDraft {
    /// Optimistic echo of text this participant sent.
    pub(crate) fn local(text: &str) -> Self {
        Self {
            id: MessageId::generate(),
            sender: Sender::Local,
            content: text.to_string(),
            original: Some(text.to_string()),
            target_lang: None,
            latency_ms: None,
        }
    }

    /// Verbatim display of an undecodable payload.
    pub(crate) fn fallback(raw: &str) -> Self {
        Self {
            id: MessageId::generate(),
            sender: Sender::Server,
            content: raw.to_string(),
            original: None,
            target_lang: None,
            latency_ms: None,
        }
    }

    /// Message from a decoded chat frame.
    pub(crate) fn from_chat(frame: ChatFrame) -> Self {
        let content = frame.display_text().unwrap_or_default().to_string();
        let id = frame
            .id
            .and_then(crate::protocol::FrameId::into_string)
            .map_or_else(MessageId::generate, MessageId);
        Self {
            id,
            sender: Sender::from_wire(&frame.sender),
            content,
            original: frame.original,
            target_lang: frame.target_lang,
            latency_ms: frame.latency_ms,
        }
    }

    pub(crate) fn id(&self) -> &MessageId {
        &self.id
    }
}

/// Ordered, append-only sequence of messages.
#[derive(Debug, Default)]
pub(crate) struct History {
    messages: Vec<Message>,
    next_position: u64,
}

impl History {
    pub(crate) fn append(&mut self, draft: MessageDraft) -> &Message {
        let position = self.next_position;
        self.next_position += 1;
        self.messages.push(Message {
            id: draft.id,
            sender: draft.sender,
            content: draft.content,
            original: draft.original,
            position,
            received_at: Utc::now(),
            target_lang: draft.target_lang,
            latency_ms: draft.latency_ms,
        });
        &self.messages[self.messages.len() - 1]
    }

    pub(crate) fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}
