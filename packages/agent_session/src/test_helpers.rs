//! In-memory transport for channel and client tests.

use std::sync::{Arc, Mutex};

use futures::channel::mpsc as fmpsc;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::channel::{Connector, FrameSink, Transport};
use crate::error::ChannelError;

/// Server side of one mock connection.
pub(crate) struct MockPeer {
    to_client: fmpsc::UnboundedSender<String>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// Deliver a frame to the client.
    pub fn push(&self, frame: &str) {
        let _ = self.to_client.unbounded_send(frame.to_string());
    }

    /// Next frame the client wrote; `None` once the client closed its side.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.next().await
    }
}

#[derive(Default)]
struct MockState {
    urls: Vec<String>,
    attempt_times: Vec<Instant>,
    fail_next: usize,
    hang: bool,
    stall_writes: bool,
}

/// Connector whose connections are [`MockPeer`]s handed to the test.
#[derive(Clone)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(MockState::default())),
                peers,
            },
            peer_rx,
        )
    }

    /// Make the next `n` attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Make attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.state.lock().unwrap().hang = hang;
    }

    /// Make new connections accept no outbound frame.
    pub fn stall_writes(&self, stall: bool) {
        self.state.lock().unwrap().stall_writes = stall;
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempt_times.clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ChannelError>> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.to_string());
        state.attempt_times.push(Instant::now());

        if state.hang {
            return future::pending().boxed();
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return future::ready(Err(ChannelError::Connect("connection refused".into()))).boxed();
        }

        let (to_client, client_rx) = fmpsc::unbounded();
        let (client_tx, from_client) = fmpsc::unbounded();
        let sink: FrameSink = if state.stall_writes {
            Box::pin(futures::sink::unfold((), |(), _frame: String| {
                future::pending::<Result<(), ChannelError>>()
            }))
        } else {
            Box::pin(client_tx.sink_map_err(|e| ChannelError::Transport(e.to_string())))
        };
        let transport = Transport {
            sink,
            stream: client_rx.map(Ok).boxed(),
        };
        let peer = MockPeer {
            to_client,
            from_client,
        };
        let peers = self.peers.clone();
        async move {
            let _ = peers.send(peer);
            Ok(transport)
        }
        .boxed()
    }
}
