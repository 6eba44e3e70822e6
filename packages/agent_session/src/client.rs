//! Session channel client: the session-level contract consumed by the UI.
//!
//! Wraps a [`ChannelHandle`] bound to one session, turns transport opens
//! into `connection_established` events followed by an automatic history
//! request, decodes inbound frames and routes them through the session's own
//! [`SharedRegistry`]. Subscriptions survive automatic reconnects and are
//! dropped by an explicit [`SessionChannelClient::disconnect`].

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{
    ChannelHandle, ChannelSignal, ConnectionState, Connector, ReconnectPolicy, WsConnector,
};
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::metrics::{ChannelMetrics, MetricsSnapshot};
use crate::protocol::{self, ChannelEvent, Command};
use crate::registry::{Handler, SharedRegistry, Topic};
use crate::types::SessionId;

pub struct SessionChannelClient {
    session_id: SessionId,
    channel: ChannelHandle,
    registry: SharedRegistry,
    metrics: Arc<ChannelMetrics>,
    pump: JoinHandle<()>,
}

impl SessionChannelClient {
    /// Client for `session_id` over WebSocket, using the configured endpoint
    /// and reconnect policy. Must be called inside a tokio runtime.
    pub fn new(session_id: SessionId, config: &ClientConfig) -> Self {
        let url = config.ws_url(&session_id);
        Self::with_connector(session_id, url, config.reconnect, WsConnector)
    }

    /// Client over an arbitrary transport.
    pub fn with_connector<C: Connector>(
        session_id: SessionId,
        url: String,
        policy: ReconnectPolicy,
        connector: C,
    ) -> Self {
        let metrics = Arc::new(ChannelMetrics::new());
        let registry = SharedRegistry::new();
        let (channel, signals) = ChannelHandle::spawn(url, policy, connector, metrics.clone());

        let pump = tokio::spawn(pump_signals(
            session_id.clone(),
            signals,
            channel.clone(),
            registry.clone(),
            metrics.clone(),
        ));

        Self {
            session_id,
            channel,
            registry,
            metrics,
            pump,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Open the channel. `connection_established` and the history request
    /// follow on every successful open, including automatic reconnects.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        self.channel.connect().await
    }

    /// Send a chat message. When the channel is not open the failure is also
    /// dispatched as an `error` event and nothing is written.
    pub fn send(
        &self,
        content: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), ChannelError> {
        self.issue(&Command::send_message(content, metadata))
    }

    /// Ask the server for its history snapshot; answered with `message_history`.
    pub fn request_history(&self) -> Result<(), ChannelError> {
        self.issue(&Command::GetHistory)
    }

    /// Best-effort keepalive, silently skipped unless open.
    pub fn ping(&self) {
        if !self.channel.is_open() {
            debug!(session_id = %self.session_id, "ping skipped, channel not open");
            return;
        }
        if let Err(e) = encode_and_send(&self.channel, &Command::Ping) {
            debug!(session_id = %self.session_id, error = %e, "ping failed");
        }
    }

    fn issue(&self, command: &Command) -> Result<(), ChannelError> {
        encode_and_send(&self.channel, command).inspect_err(|e| {
            warn!(session_id = %self.session_id, error = %e, "command not sent");
            self.registry
                .dispatch(&ChannelEvent::error(format!("Not connected: {e}")));
        })
    }

    /// Register `handler` for `topic`, replacing any previous one.
    pub fn on_message<F>(&self, topic: impl Into<Topic>, handler: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.registry.on(topic.into(), handler);
    }

    pub fn off_message(&self, topic: impl Into<Topic>) -> bool {
        self.registry.off(topic.into())
    }

    /// Close the channel without retrying and drop every subscription.
    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
        self.registry.clear();
        info!(session_id = %self.session_id, "session channel disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Subscribe to connection state transitions.
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for SessionChannelClient {
    fn drop(&mut self) {
        // The pump holds a channel handle; aborting it lets the channel task
        // see its last handle go and shut the connection down.
        self.pump.abort();
    }
}

fn encode_and_send(channel: &ChannelHandle, command: &Command) -> Result<(), ChannelError> {
    if !channel.is_open() {
        return Err(ChannelError::NotOpen);
    }
    let frame = protocol::encode(command).map_err(|e| ChannelError::Encode(e.to_string()))?;
    channel.send(frame)
}

/// Single dispatch loop: every signal is handled to completion, in the order
/// the channel produced it.
async fn pump_signals(
    session_id: SessionId,
    mut signals: mpsc::UnboundedReceiver<ChannelSignal>,
    channel: ChannelHandle,
    registry: SharedRegistry,
    metrics: Arc<ChannelMetrics>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ChannelSignal::Opened => {
                info!(%session_id, "connection established");
                registry.dispatch(&ChannelEvent::ConnectionEstablished {
                    session_id: Some(session_id.clone()),
                    message: None,
                    timestamp: Some(chrono::Local::now().to_rfc3339()),
                });
                if let Err(e) = encode_and_send(&channel, &Command::GetHistory) {
                    warn!(%session_id, error = %e, "history request after open failed");
                }
            }
            ChannelSignal::Frame(frame) => match protocol::decode(&frame) {
                Ok(event) => {
                    debug!(%session_id, tag = %event.tag(), "event");
                    registry.dispatch(&event);
                }
                Err(e) => {
                    metrics.malformed_frame();
                    warn!(%session_id, error = %e, "dropping malformed frame");
                }
            },
            ChannelSignal::Closed { retrying } => {
                debug!(%session_id, retrying, "connection closed");
            }
        }
    }
}
