//! Reconnecting channel: owns the single streaming connection of a session.
//!
//! A spawned actor task holds the connection handle, the retry counter and
//! the retry timer, and processes commands, transport events and timer
//! expiry one at a time. Callers talk to it through a cloneable
//! [`ChannelHandle`]; everything the transport delivers comes back, in
//! order, as [`ChannelSignal`]s.
//!
//! ```text
//! Idle ──connect──► Connecting ──ok──► Open ──close──► Closed ──timer──► Connecting …
//!                        │                                │
//!                        └─err (caller attempt)──► Closed └─budget spent: stays Closed
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::metrics::ChannelMetrics;

/// Upper bound on waiting for a close frame to flush on `disconnect()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A peer that accepts no outbound frame for this long is treated as gone.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Linear backoff: the n-th retry waits `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

/// An open connection: outbound text frames in, inbound text frames out.
/// The stream ending means the peer closed the connection.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports. The channel never holds more than one at a time.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ChannelError>>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ChannelError>> {
        let url = url.to_string();
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(ChannelError::from_tungstenite)?;
            let (ws_write, ws_read) = ws_stream.split();

            let sink = ws_write
                .sink_map_err(|e| ChannelError::Transport(e.to_string()))
                .with(|text: String| {
                    future::ready(Ok::<_, ChannelError>(tungstenite::Message::Text(text.into())))
                });
            let stream = ws_read.filter_map(|msg| future::ready(inbound_text(msg)));

            Ok(Transport {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            })
        }
        .boxed()
    }
}

/// Text payload of an inbound WebSocket message. The event protocol is
/// text-only, so binary frames are dropped.
fn inbound_text(
    msg: Result<tungstenite::Message, tungstenite::Error>,
) -> Option<Result<String, ChannelError>> {
    match msg {
        Ok(tungstenite::Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(tungstenite::Message::Binary(bytes)) => {
            warn!(len = bytes.len(), "dropping binary frame");
            None
        }
        // Ping/pong are answered by tungstenite; Close ends the stream.
        Ok(_) => None,
        Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
    }
}

/// What the channel reports to its owner, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// A transport opened (first connect or reconnect).
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The open transport went away. `retrying` tells whether a reconnect
    /// has been scheduled.
    Closed { retrying: bool },
}

#[derive(Debug)]
enum ChannelCommand {
    Connect {
        respond_to: oneshot::Sender<Result<(), ChannelError>>,
    },
    Write {
        frame: String,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a running channel task. Dropping every handle stops the task
/// and closes the connection.
#[derive(Clone)]
pub struct ChannelHandle {
    sender: mpsc::UnboundedSender<ChannelCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ChannelHandle {
    /// Spawn the channel task for `url`. Must be called inside a tokio runtime.
    pub fn spawn<C: Connector>(
        url: String,
        policy: ReconnectPolicy,
        connector: C,
        metrics: Arc<ChannelMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelSignal>) {
        let (sender, commands) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);

        let actor = ChannelActor {
            url,
            connector,
            policy,
            attempt: 0,
            commands,
            state: state_tx,
            signals,
            metrics,
            transport: None,
            pending: None,
            waiters: Vec::new(),
            retry: None,
        };
        tokio::spawn(actor.run());

        (Self { sender, state }, signal_rx)
    }

    /// Open the connection. Resolves immediately when already open or
    /// connecting; otherwise resolves once this attempt opens or fails.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Connect { respond_to: tx })
            .map_err(|_| ChannelError::ActorGone)?;
        rx.await.map_err(|_| ChannelError::ActorGone)?
    }

    /// Queue a text frame. Fails without queueing unless the channel is open.
    pub fn send(&self, frame: String) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        self.sender
            .send(ChannelCommand::Write { frame })
            .map_err(|_| ChannelError::ActorGone)
    }

    /// Close the connection, cancel any scheduled retry and stay closed.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ChannelCommand::Disconnect { respond_to: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Who started a connection attempt. Only retries feed back into the
/// backoff loop when they fail; a caller's failed attempt is reported to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOrigin {
    Caller,
    Retry,
}

struct PendingConnect {
    origin: AttemptOrigin,
    future: BoxFuture<'static, Result<Transport, ChannelError>>,
}

struct ChannelActor<C> {
    url: String,
    connector: C,
    policy: ReconnectPolicy,
    attempt: u32,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    state: watch::Sender<ConnectionState>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    metrics: Arc<ChannelMetrics>,
    transport: Option<Transport>,
    pending: Option<PendingConnect>,
    waiters: Vec<oneshot::Sender<Result<(), ChannelError>>>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl<C: Connector> ChannelActor<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                result = next_connect(&mut self.pending) => self.on_connect_result(result),
                frame = next_frame(&mut self.transport) => self.on_frame(frame),
                () = next_retry(&mut self.retry) => {
                    self.retry = None;
                    self.begin_attempt(AttemptOrigin::Retry, None);
                }
            }
        }

        self.disconnect().await;
        debug!(url = %self.url, "channel task stopped");
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(url = %self.url, from = ?prev, to = ?next, "channel state");
        }
    }

    async fn handle_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Connect { respond_to } => match self.current() {
                ConnectionState::Open | ConnectionState::Connecting => {
                    let _ = respond_to.send(Ok(()));
                }
                ConnectionState::Idle | ConnectionState::Closed => {
                    // An explicit connect supersedes a scheduled retry.
                    self.retry = None;
                    self.begin_attempt(AttemptOrigin::Caller, Some(respond_to));
                }
            },
            ChannelCommand::Write { frame } => self.write(frame).await,
            ChannelCommand::Disconnect { respond_to } => {
                self.disconnect().await;
                let _ = respond_to.send(());
            }
        }
    }

    fn begin_attempt(
        &mut self,
        origin: AttemptOrigin,
        waiter: Option<oneshot::Sender<Result<(), ChannelError>>>,
    ) {
        self.set_state(ConnectionState::Connecting);
        debug!(url = %self.url, attempt = self.attempt, ?origin, "opening transport");
        self.pending = Some(PendingConnect {
            origin,
            future: self.connector.connect(&self.url),
        });
        self.waiters.extend(waiter);
    }

    fn on_connect_result(&mut self, result: Result<Transport, ChannelError>) {
        let origin = self
            .pending
            .take()
            .map_or(AttemptOrigin::Caller, |pending| pending.origin);

        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.attempt = 0;
                self.set_state(ConnectionState::Open);
                self.metrics.connection_opened();
                info!(url = %self.url, "channel open");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                let _ = self.signals.send(ChannelSignal::Opened);
            }
            Err(err) => {
                self.set_state(ConnectionState::Closed);
                match origin {
                    AttemptOrigin::Caller => {
                        warn!(url = %self.url, error = %err, "connect failed");
                        for waiter in self.waiters.drain(..) {
                            let _ = waiter.send(Err(err.clone()));
                        }
                    }
                    AttemptOrigin::Retry => {
                        warn!(url = %self.url, attempt = self.attempt, error = %err, "reconnect failed");
                        self.schedule_retry();
                    }
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<String, ChannelError>>) {
        match frame {
            Some(Ok(text)) => {
                self.metrics.frame_received();
                debug!(len = text.len(), "frame received");
                let _ = self.signals.send(ChannelSignal::Frame(text));
            }
            Some(Err(err)) => {
                warn!(url = %self.url, error = %err, "transport error");
                self.on_transport_closed();
            }
            None => {
                info!(url = %self.url, "transport closed");
                self.on_transport_closed();
            }
        }
    }

    fn on_transport_closed(&mut self) {
        self.transport = None;
        self.set_state(ConnectionState::Closed);
        let retrying = self.schedule_retry();
        let _ = self.signals.send(ChannelSignal::Closed { retrying });
    }

    /// Arm the retry timer if the budget allows. Returns whether it did.
    fn schedule_retry(&mut self) -> bool {
        if self.attempt >= self.policy.max_attempts {
            warn!(
                url = %self.url,
                max_attempts = self.policy.max_attempts,
                "reconnect attempts exhausted, staying closed"
            );
            return false;
        }
        self.attempt += 1;
        let delay = self.policy.delay_for(self.attempt);
        self.metrics.reconnect_scheduled();
        info!(
            url = %self.url,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
        true
    }

    async fn write(&mut self, frame: String) {
        let Some(transport) = self.transport.as_mut() else {
            warn!(url = %self.url, "dropping outbound frame, channel not open");
            return;
        };
        match tokio::time::timeout(WRITE_TIMEOUT, transport.sink.send(frame)).await {
            Ok(Ok(())) => self.metrics.frame_sent(),
            Ok(Err(err)) => {
                warn!(url = %self.url, error = %err, "send failed");
                self.on_transport_closed();
            }
            Err(_) => {
                warn!(url = %self.url, timeout_secs = WRITE_TIMEOUT.as_secs(), "send stalled, dropping connection");
                self.on_transport_closed();
            }
        }
    }

    async fn disconnect(&mut self) {
        self.retry = None;
        if self.pending.take().is_some() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(ChannelError::Disconnected));
            }
        }
        self.attempt = 0;

        let had_transport = match self.transport.take() {
            Some(mut transport) => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, transport.sink.close()).await;
                true
            }
            None => false,
        };

        if self.current() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed);
        }
        if had_transport {
            info!(url = %self.url, "channel disconnected");
            let _ = self.signals.send(ChannelSignal::Closed { retrying: false });
        }
    }
}

async fn next_connect(pending: &mut Option<PendingConnect>) -> Result<Transport, ChannelError> {
    match pending {
        Some(pending) => (&mut pending.future).await,
        None => future::pending().await,
    }
}

async fn next_frame(transport: &mut Option<Transport>) -> Option<Result<String, ChannelError>> {
    match transport {
        Some(transport) => transport.stream.next().await,
        None => future::pending().await,
    }
}

async fn next_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
