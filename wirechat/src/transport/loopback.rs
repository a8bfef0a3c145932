//! In-process connector for testing.
//!
//! [`LoopbackConnector`] hands out links backed by tokio channels. Every
//! successful connect produces a [`LoopbackServer`] that the test picks up
//! with [`LoopbackConnector::next_session`] to read what the client wrote,
//! push frames to the client, or drop the link.
//!
//! Connect attempts can be refused and writes can be made to fail after a
//! fixed number of frames, which is how reconnect and flush behavior is
//! exercised without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use super::{Connector, FrameSink, FrameSource, TransportError};

/// Unlimited write budget.
const UNLIMITED: usize = usize::MAX;

/// One recorded call to [`Connector::connect`].
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    /// The URL the client dialed.
    pub target: Url,
    /// When the attempt happened (tokio clock, so paused time works).
    pub at: Instant,
    /// Whether the attempt was accepted.
    pub accepted: bool,
}

#[derive(Debug, Default)]
struct Script {
    /// Number of upcoming attempts to refuse.
    refuse_next: usize,
    /// Refuse every attempt regardless of `refuse_next`.
    refuse_all: bool,
    /// Write budget applied to the next accepted session.
    next_write_budget: Option<usize>,
    attempts: Vec<ConnectAttempt>,
    /// Frames successfully written by the client, across all sessions.
    wire: Vec<String>,
}

/// Connector whose links stay inside the process.
pub struct LoopbackConnector {
    script: Arc<Mutex<Script>>,
    sessions_tx: mpsc::UnboundedSender<LoopbackServer>,
    sessions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackServer>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// Create a connector that accepts every attempt.
    #[must_use]
    pub fn new() -> Self {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            sessions_tx,
            sessions_rx: tokio::sync::Mutex::new(sessions_rx),
        }
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: usize) {
        self.script.lock().refuse_next = count;
    }

    /// Refuse (or stop refusing) every connect attempt.
    pub fn refuse_all(&self, refuse: bool) {
        self.script.lock().refuse_all = refuse;
    }

    /// Let the next accepted session write `count` frames, then fail.
    pub fn fail_writes_after(&self, count: usize) {
        self.script.lock().next_write_budget = Some(count);
    }

    /// Every connect attempt made so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.script.lock().attempts.clone()
    }

    /// Every frame the client managed to write, in wire order.
    #[must_use]
    pub fn wire(&self) -> Vec<String> {
        self.script.lock().wire.clone()
    }

    /// Wait for the next accepted session.
    pub async fn next_session(&self) -> Option<LoopbackServer> {
        self.sessions_rx.lock().await.recv().await
    }
}

impl Connector for LoopbackConnector {
    type Sink = LoopbackSink;
    type Source = LoopbackSource;

    async fn connect(&self, target: &Url) -> Result<(LoopbackSink, LoopbackSource), TransportError> {
        let budget = {
            let mut script = self.script.lock();
            let refuse = script.refuse_all || script.refuse_next > 0;
            script.refuse_next = script.refuse_next.saturating_sub(1);
            script.attempts.push(ConnectAttempt {
                target: target.clone(),
                at: Instant::now(),
                accepted: !refuse,
            });
            if refuse {
                return Err(TransportError::Unreachable(
                    target.host_str().unwrap_or("loopback").to_string(),
                ));
            }
            script.next_write_budget.take().unwrap_or(UNLIMITED)
        };

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let sink = LoopbackSink {
            tx: to_server,
            budget: Arc::new(AtomicUsize::new(budget)),
            script: Arc::clone(&self.script),
        };
        let source = LoopbackSource { rx: from_server };
        let server = LoopbackServer {
            target: target.clone(),
            from_client,
            to_client,
            received: VecDeque::new(),
        };
        // The receiver lives as long as the connector; a send error means it is gone.
        let _ = self.sessions_tx.send(server);
        Ok((sink, source))
    }
}

/// Client write half of a loopback link.
pub struct LoopbackSink {
    tx: mpsc::UnboundedSender<String>,
    budget: Arc<AtomicUsize>,
    script: Arc<Mutex<Script>>,
}

impl FrameSink for LoopbackSink {
    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        let allowed = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(TransportError::WebSocket("write budget exhausted".into()));
        }
        self.tx
            .send(frame.to_owned())
            .map_err(|_| TransportError::ConnectionClosed)?;
        self.script.lock().wire.push(frame.to_owned());
        Ok(())
    }

    async fn close(&mut self) {
        // Closing the sender signals the server end.
        let (closed, _) = mpsc::unbounded_channel();
        self.tx = closed;
    }
}

/// Client read half of a loopback link.
pub struct LoopbackSource {
    rx: mpsc::UnboundedReceiver<String>,
}

impl FrameSource for LoopbackSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Server end of one accepted loopback link.
///
/// Dropping it closes the link from the server side.
pub struct LoopbackServer {
    target: Url,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
    received: VecDeque<String>,
}

impl LoopbackServer {
    /// The URL the client dialed for this session.
    #[must_use]
    pub const fn target(&self) -> &Url {
        &self.target
    }

    /// Deliver a frame to the client.
    ///
    /// Returns `false` if the client side is gone.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    /// Wait for the next frame written by the client.
    ///
    /// Returns `None` once the client has closed its write half.
    pub async fn recv(&mut self) -> Option<String> {
        if let Some(frame) = self.received.pop_front() {
            return Some(frame);
        }
        self.from_client.recv().await
    }

    /// Frames already written by the client, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        while let Ok(frame) = self.from_client.try_recv() {
            self.received.push_back(frame);
        }
        self.received.drain(..).collect()
    }

    /// Close the link from the server side.
    pub fn close(self) {
        drop(self);
    }
}
