//! Per-client dispatch registry: one handler per event tag plus one wildcard.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::error::DecodeError;
use crate::protocol::{ChannelEvent, EventTag};

/// Reserved topic name matching every event.
pub const WILDCARD: &str = "*";

/// Subscriber callback. Handlers run on the client's dispatch task and must
/// not block.
pub type Handler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// What a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Tag(EventTag),
    /// Every event, in addition to its tag handler.
    Any,
}

impl From<EventTag> for Topic {
    fn from(tag: EventTag) -> Self {
        Topic::Tag(tag)
    }
}

impl FromStr for Topic {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == WILDCARD {
            Ok(Topic::Any)
        } else {
            s.parse().map(Topic::Tag)
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Tag(tag) => fmt::Display::fmt(tag, f),
            Topic::Any => f.write_str(WILDCARD),
        }
    }
}

/// Topic → handler map. Re-registering a topic replaces its handler.
#[derive(Default)]
pub struct DispatchRegistry {
    handlers: HashMap<Topic, Handler>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`, returning the handler it replaced.
    pub fn on(&mut self, topic: Topic, handler: Handler) -> Option<Handler> {
        self.handlers.insert(topic, handler)
    }

    /// Remove the handler for `topic`. Returns whether one was registered.
    pub fn off(&mut self, topic: Topic) -> bool {
        self.handlers.remove(&topic).is_some()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers that should see `event`: the tag handler first, then the wildcard.
    pub fn handlers_for(&self, event: &ChannelEvent) -> Vec<Handler> {
        [Topic::Tag(event.tag()), Topic::Any]
            .iter()
            .filter_map(|topic| self.handlers.get(topic).cloned())
            .collect()
    }

    /// Invoke the matching handlers. Returns how many ran to completion.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        invoke_all(&self.handlers_for(event), event)
    }
}

/// Run each handler in isolation; a panicking handler is logged and does not
/// stop the ones after it.
fn invoke_all(handlers: &[Handler], event: &ChannelEvent) -> usize {
    let mut completed = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(()) => completed += 1,
            Err(_) => error!(tag = %event.tag(), "event handler panicked"),
        }
    }
    completed
}

/// Registry shared between the client API and its dispatch task.
///
/// The lock is only held to look handlers up, never while they run, so a
/// handler may freely call back into the client (including `on`/`off`).
#[derive(Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<DispatchRegistry>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut DispatchRegistry) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn on(&self, topic: Topic, handler: Handler) {
        self.with(|registry| registry.on(topic, handler));
    }

    pub fn off(&self, topic: Topic) -> bool {
        self.with(|registry| registry.off(topic))
    }

    pub fn clear(&self) {
        self.with(DispatchRegistry::clear);
    }

    pub fn len(&self) -> usize {
        self.with(|registry| registry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let handlers = self.with(|registry| registry.handlers_for(event));
        invoke_all(&handlers, event)
    }
}
