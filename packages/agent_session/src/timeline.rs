//! Message timeline as seen by a UI: ordered, de-duplicated, plus the
//! transient typing and error status.

use crate::protocol::ChannelEvent;
use crate::types::Message;

/// How an event changed the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineChange {
    /// History snapshot replaced all messages.
    Replaced,
    Appended,
    /// Message already present; not appended again.
    Duplicate,
    /// Typing or error status changed.
    Status,
    Unchanged,
}

/// Arrival-ordered messages; timestamps are never used to sort.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    typing: Option<String>,
    last_error: Option<String>,
    total_count: Option<u64>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &ChannelEvent) -> TimelineChange {
        match event {
            ChannelEvent::MessageHistory {
                messages,
                total_count,
            } => {
                self.messages = messages.clone();
                self.total_count = *total_count;
                TimelineChange::Replaced
            }
            ChannelEvent::Message { message } | ChannelEvent::MessageReceived { message } => {
                self.push(message)
            }
            ChannelEvent::Typing { agent } => {
                self.typing = Some(agent.clone().unwrap_or_default());
                TimelineChange::Status
            }
            ChannelEvent::TypingStop => {
                self.typing = None;
                TimelineChange::Status
            }
            ChannelEvent::Error { error, .. } => {
                self.last_error = Some(error.clone());
                TimelineChange::Status
            }
            ChannelEvent::ConnectionEstablished { .. } | ChannelEvent::Pong => {
                TimelineChange::Unchanged
            }
        }
    }

    fn push(&mut self, message: &Message) -> TimelineChange {
        // History and live stream overlap after a reconnect.
        if self.messages.iter().any(|m| same_message(m, message)) {
            return TimelineChange::Duplicate;
        }
        if message.is_from_agent() {
            self.typing = None;
        }
        self.messages.push(message.clone());
        TimelineChange::Appended
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Agent label while a reply is being produced.
    pub fn typing(&self) -> Option<&str> {
        self.typing.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Server-side message count from the last snapshot, if it sent one.
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }
}

/// Messages without a timestamp never compare equal.
fn same_message(a: &Message, b: &Message) -> bool {
    !a.timestamp.is_empty()
        && a.kind == b.kind
        && a.timestamp == b.timestamp
        && a.content == b.content
        && a.agent_name == b.agent_name
}
