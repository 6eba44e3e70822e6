//! Client for live agent chat sessions.
//!
//! A session is created over HTTP ([`SessionService`]), then followed over a
//! persistent WebSocket ([`SessionChannelClient`]) that reconnects with
//! linear backoff, requests the history snapshot on every open and routes
//! typed [`ChannelEvent`]s to per-tag subscribers. [`Timeline`] folds those
//! events into the ordered message list a UI renders.
//!
//! ```no_run
//! use agent_session::{ClientConfig, EventTag, SessionChannelClient, SessionService, Timeline};
//! use std::sync::{Arc, Mutex};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::load(None)?;
//! let session = SessionService::new(&config).create_session(None).await?;
//!
//! let client = SessionChannelClient::new(session.session_id, &config);
//! let timeline = Arc::new(Mutex::new(Timeline::new()));
//! let view = timeline.clone();
//! client.on_message(agent_session::Topic::Any, move |event| {
//!     view.lock().unwrap().apply(event);
//! });
//! client.on_message(EventTag::Error, |event| eprintln!("{event:?}"));
//!
//! client.connect().await?;
//! client.send("list the files in my workspace", None)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod timeline;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use channel::{ChannelHandle, ConnectionState, Connector, ReconnectPolicy, WsConnector};
pub use client::SessionChannelClient;
pub use config::ClientConfig;
pub use error::{ChannelError, DecodeError, ServiceError};
pub use metrics::MetricsSnapshot;
pub use protocol::{ChannelEvent, Command, EventTag};
pub use registry::{DispatchRegistry, Topic};
pub use service::SessionService;
pub use timeline::{Timeline, TimelineChange};
pub use types::{Message, MessageKind, SessionId};
