//! The owner task behind a [`ConnectionManager`](super::ConnectionManager).
//!
//! One driver runs per manager. It alone touches the phase, attempt count,
//! pending queue and reconnect timer; the manager only sends it commands.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use super::observer::{ConnectionEvent, ObserverRegistry};
use super::state::{ConnectionPhase, ConnectionSnapshot, ConnectionState};
use crate::config::ReconnectConfig;
use crate::transport::{Connector, FrameSink, FrameSource, TransportError};

/// Requests from the manager to its driver.
#[derive(Debug)]
pub(crate) enum Command {
    /// Transmit or queue a serialized frame.
    Send(String),
    /// Stop for good.
    Close,
}

/// How a served link ended.
enum LinkEnd {
    /// Unplanned close; reconnect.
    Lost,
    /// `close()` was requested or the manager is gone.
    Shutdown,
}

/// One step of the open-link loop.
enum Step {
    Inbound(Option<Result<String, TransportError>>),
    Command(Option<Command>),
}

pub(crate) struct Driver<C: Connector> {
    pub(crate) connector: Arc<C>,
    pub(crate) target: Url,
    pub(crate) config: ReconnectConfig,
    pub(crate) state: ConnectionState,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) observers: Arc<ObserverRegistry>,
    pub(crate) snapshot: watch::Sender<ConnectionSnapshot>,
}

impl<C: Connector> Driver<C> {
    /// Connect, serve, back off, repeat until shut down.
    pub(crate) async fn run(mut self) {
        let host = self.target.host_str().unwrap_or_default().to_string();
        loop {
            self.state.begin_connect();
            self.publish();
            self.emit(ConnectionEvent::Connecting {
                attempt: self.state.attempts(),
            });

            let Some(result) = self.connect().await else {
                break;
            };
            match result {
                Ok((sink, source)) => {
                    info!(host = %host, "connection open");
                    if matches!(self.serve(sink, source).await, LinkEnd::Shutdown) {
                        break;
                    }
                    info!(host = %host, "connection lost");
                }
                Err(error) => {
                    warn!(host = %host, error = %error, "connect attempt failed");
                    self.emit(ConnectionEvent::Error(error));
                }
            }

            if !self.wait_for_retry().await {
                break;
            }
        }
        self.shutdown();
    }

    /// Run one connect attempt while still accepting commands.
    ///
    /// Returns `None` if a close was requested first.
    async fn connect(&mut self) -> Option<Result<(C::Sink, C::Source), TransportError>> {
        let connector = Arc::clone(&self.connector);
        let target = self.target.clone();
        let connect = connector.connect(&target);
        tokio::pin!(connect);

        loop {
            let command = tokio::select! {
                biased;
                command = self.commands.recv() => command,
                result = &mut connect => return Some(result),
            };
            match command {
                Some(Command::Send(frame)) => self.enqueue(frame),
                Some(Command::Close) | None => return None,
            }
        }
    }

    /// Flush the queue, then shuttle frames until the link ends.
    async fn serve(&mut self, mut sink: C::Sink, mut source: C::Source) -> LinkEnd {
        let mut backlog = self.state.mark_open();
        self.publish();

        if !backlog.is_empty() {
            debug!(count = backlog.len(), "flushing pending frames");
        }
        while let Some(frame) = backlog.pop_front() {
            if let Err(error) = sink.send_frame(&frame).await {
                warn!(error = %error, unsent = backlog.len() + 1, "flush interrupted");
                backlog.push_front(frame);
                self.state.restore_unsent(backlog);
                self.emit(ConnectionEvent::Error(error));
                return LinkEnd::Lost;
            }
        }
        self.emit(ConnectionEvent::Open);

        loop {
            let step = tokio::select! {
                frame = source.next_frame() => Step::Inbound(frame),
                command = self.commands.recv() => Step::Command(command),
            };
            match step {
                Step::Inbound(Some(Ok(frame))) => self.emit(ConnectionEvent::Message(frame)),
                Step::Inbound(Some(Err(error))) => {
                    warn!(error = %error, "dropping unreadable frame");
                    self.emit(ConnectionEvent::Error(error));
                }
                Step::Inbound(None) => return LinkEnd::Lost,
                Step::Command(Some(Command::Send(frame))) => {
                    if let Err(error) = sink.send_frame(&frame).await {
                        warn!(error = %error, "write failed, re-queueing frame");
                        self.state.restore_unsent([frame]);
                        self.emit(ConnectionEvent::Error(error));
                        return LinkEnd::Lost;
                    }
                }
                Step::Command(Some(Command::Close) | None) => {
                    sink.close().await;
                    return LinkEnd::Shutdown;
                }
            }
        }
    }

    /// Arm the reconnect timer and wait for it.
    ///
    /// Returns `false` if a close was requested while waiting.
    async fn wait_for_retry(&mut self) -> bool {
        let Some(delay) = self.state.schedule_reconnect(&self.config) else {
            return false;
        };
        let attempt = self.state.attempts();
        self.publish();
        self.emit(ConnectionEvent::Closed { retrying: true });
        self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });
        debug!(attempt, delay_ms = delay.as_millis(), "reconnect scheduled");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            let command = tokio::select! {
                biased;
                command = self.commands.recv() => command,
                () = &mut sleep => {
                    self.state.timer_fired();
                    return true;
                }
            };
            match command {
                Some(Command::Send(frame)) => self.enqueue(frame),
                Some(Command::Close) | None => return false,
            }
        }
    }

    fn enqueue(&mut self, frame: String) {
        if self.state.enqueue(frame) {
            debug!(pending = self.state.snapshot().pending, "frame queued");
            self.publish();
        }
    }

    fn shutdown(&mut self) {
        let dropped = self.state.close();
        if dropped > 0 {
            debug!(dropped, "discarding pending frames");
        }
        debug_assert_eq!(self.state.phase(), ConnectionPhase::ClosedFinal);
        self.publish();
        self.emit(ConnectionEvent::Closed { retrying: false });
        info!("connection closed");
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.state.snapshot());
    }

    fn emit(&self, event: ConnectionEvent) {
        self.observers.emit(&event);
    }
}
