//! Typed observers for connection lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::transport::TransportError;

/// Receives connection lifecycle callbacks.
///
/// Every method defaults to a no-op so implementors pick what they need.
/// Callbacks run on the driver task and must not block.
pub trait ConnectionObserver: Send + Sync {
    /// A connect attempt is starting. `attempt` counts failed cycles so far.
    fn on_connecting(&self, attempt: u32) {
        let _ = attempt;
    }

    /// The link is open and the pending queue has been flushed.
    fn on_open(&self) {}

    /// A raw inbound text frame.
    fn on_message(&self, frame: &str) {
        let _ = frame;
    }

    /// The link closed. `retrying` is false only after `close()`.
    fn on_close(&self, retrying: bool) {
        let _ = retrying;
    }

    /// A transport problem was observed.
    fn on_error(&self, error: &TransportError) {
        let _ = error;
    }

    /// A reconnect timer was armed.
    fn on_reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        let _ = (attempt, delay);
    }
}

/// Owned form of an observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// See [`ConnectionObserver::on_connecting`].
    Connecting {
        /// Failed cycles so far.
        attempt: u32,
    },
    /// See [`ConnectionObserver::on_open`].
    Open,
    /// See [`ConnectionObserver::on_message`].
    Message(String),
    /// See [`ConnectionObserver::on_close`].
    Closed {
        /// Whether a reconnect will follow.
        retrying: bool,
    },
    /// See [`ConnectionObserver::on_error`].
    Error(TransportError),
    /// See [`ConnectionObserver::on_reconnect_scheduled`].
    ReconnectScheduled {
        /// Attempt number the timer is for.
        attempt: u32,
        /// Time until the attempt.
        delay: Duration,
    },
}

impl ConnectionEvent {
    /// Invoke the matching callback on `observer`.
    pub fn dispatch(&self, observer: &dyn ConnectionObserver) {
        match self {
            Self::Connecting { attempt } => observer.on_connecting(*attempt),
            Self::Open => observer.on_open(),
            Self::Message(frame) => observer.on_message(frame),
            Self::Closed { retrying } => observer.on_close(*retrying),
            Self::Error(error) => observer.on_error(error),
            Self::ReconnectScheduled { attempt, delay } => {
                observer.on_reconnect_scheduled(*attempt, *delay);
            }
        }
    }
}

/// Observer that forwards every callback into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl ConnectionObserver for ChannelObserver {
    fn on_connecting(&self, attempt: u32) {
        self.forward(ConnectionEvent::Connecting { attempt });
    }

    fn on_open(&self) {
        self.forward(ConnectionEvent::Open);
    }

    fn on_message(&self, frame: &str) {
        self.forward(ConnectionEvent::Message(frame.to_owned()));
    }

    fn on_close(&self, retrying: bool) {
        self.forward(ConnectionEvent::Closed { retrying });
    }

    fn on_error(&self, error: &TransportError) {
        self.forward(ConnectionEvent::Error(error.clone()));
    }

    fn on_reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        self.forward(ConnectionEvent::ReconnectScheduled { attempt, delay });
    }
}

/// Registered observers of one connection manager.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl ObserverRegistry {
    /// Add an observer. It sees events emitted from now on.
    pub fn register(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.write().push(observer);
    }

    /// Deliver `event` to every observer in registration order.
    pub fn emit(&self, event: &ConnectionEvent) {
        // Call outside the lock so an observer may register another.
        let observers = self.observers.read().clone();
        for observer in &observers {
            event.dispatch(observer.as_ref());
        }
    }
}
