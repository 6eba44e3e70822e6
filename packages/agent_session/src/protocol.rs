//! Envelope codec for the session channel.
//!
//! Every frame is a JSON object discriminated by its `"type"` field. Outbound
//! frames are [`Command`]s; inbound frames decode to exactly one
//! [`ChannelEvent`] or are rejected with a [`DecodeError`]. Decoding never
//! touches connection state, so a bad frame costs nothing but itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::types::{Message, SessionId};

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Chat message for the agent.
    #[serde(rename = "message")]
    SendMessage {
        content: String,
        metadata: Option<Map<String, Value>>,
        timestamp: String,
    },
    /// Ask for the recent-history snapshot.
    GetHistory,
    /// Keepalive; answered with `pong`.
    Ping,
}

impl Command {
    /// A `message` command stamped with the current time.
    pub fn send_message(content: impl Into<String>, metadata: Option<Map<String, Value>>) -> Self {
        Command::SendMessage {
            content: content.into(),
            metadata,
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// The session is live. Synthesized locally on every transport open; the
    /// server also sends one carrying a welcome text.
    ConnectionEstablished {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// A reply produced by an agent.
    Message { message: Message },
    /// Echo of a user message accepted by the server.
    MessageReceived { message: Message },
    /// Full ordered snapshot; replaces whatever the consumer holds.
    MessageHistory {
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_count: Option<u64>,
    },
    Typing {
        #[serde(default)]
        agent: Option<String>,
    },
    TypingStop,
    Error {
        #[serde(default)]
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Pong,
}

impl ChannelEvent {
    pub fn tag(&self) -> EventTag {
        match self {
            ChannelEvent::ConnectionEstablished { .. } => EventTag::ConnectionEstablished,
            ChannelEvent::Message { .. } => EventTag::Message,
            ChannelEvent::MessageReceived { .. } => EventTag::MessageReceived,
            ChannelEvent::MessageHistory { .. } => EventTag::MessageHistory,
            ChannelEvent::Typing { .. } => EventTag::Typing,
            ChannelEvent::TypingStop => EventTag::TypingStop,
            ChannelEvent::Error { .. } => EventTag::Error,
            ChannelEvent::Pong => EventTag::Pong,
        }
    }

    /// A locally generated `error` event.
    pub fn error(error: impl Into<String>) -> Self {
        ChannelEvent::Error {
            error: error.into(),
            timestamp: Some(chrono::Local::now().to_rfc3339()),
        }
    }
}

/// Discriminant of [`ChannelEvent`], as carried in the `"type"` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    ConnectionEstablished,
    Message,
    MessageReceived,
    MessageHistory,
    Typing,
    TypingStop,
    Error,
    Pong,
}

impl EventTag {
    pub const ALL: [EventTag; 8] = [
        EventTag::ConnectionEstablished,
        EventTag::Message,
        EventTag::MessageReceived,
        EventTag::MessageHistory,
        EventTag::Typing,
        EventTag::TypingStop,
        EventTag::Error,
        EventTag::Pong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::ConnectionEstablished => "connection_established",
            EventTag::Message => "message",
            EventTag::MessageReceived => "message_received",
            EventTag::MessageHistory => "message_history",
            EventTag::Typing => "typing",
            EventTag::TypingStop => "typing_stop",
            EventTag::Error => "error",
            EventTag::Pong => "pong",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventTag {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownTag(s.to_string()))
    }
}

/// Serialize a command into a text frame.
pub fn encode(command: &Command) -> Result<String, serde_json::Error> {
    serde_json::to_string(command)
}

/// Parse a text frame into an event.
///
/// The tag is checked before the payload so that unknown tags and broken
/// payloads are reported distinctly.
pub fn decode(frame: &str) -> Result<ChannelEvent, DecodeError> {
    let value: Value = serde_json::from_str(frame).map_err(DecodeError::Malformed)?;
    let tag = match value.get("type") {
        Some(Value::String(tag)) => tag.parse::<EventTag>()?,
        _ => return Err(DecodeError::MissingTag),
    };
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload { tag, source })
}
