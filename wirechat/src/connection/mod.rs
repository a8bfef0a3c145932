//! Resilient connection manager.
//!
//! A [`ConnectionManager`] keeps one logical connection to the chat server
//! alive for as long as it exists. Transient failures are hidden behind
//! exponential backoff; frames sent while the link is down are queued and
//! flushed in submission order once it comes back. Only [`ConnectionManager::close`]
//! stops it for good.
//!
//! Connectivity is reported through [`ConnectionObserver`]s and through a
//! [`ConnectionSnapshot`] published on a `watch` channel.

mod driver;
pub mod observer;
pub mod state;
pub mod target;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

pub use observer::{ChannelObserver, ConnectionEvent, ConnectionObserver, ObserverRegistry};
pub use state::{ConnectionPhase, ConnectionSnapshot, backoff_delay};
pub use target::{Endpoint, Identity};

use crate::config::ReconnectConfig;
use crate::transport::Connector;
use driver::{Command, Driver};
use state::ConnectionState;

/// Errors returned by [`ConnectionManager::open`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The endpoint did not form a valid URL.
    #[error("invalid connection target: {0}")]
    InvalidTarget(#[from] url::ParseError),

    /// The identity carries neither a token nor a user id.
    #[error("identity has neither a token nor a user id")]
    MissingIdentity,

    /// `open` was already called on this manager.
    #[error("connection manager is already open")]
    AlreadyOpened,

    /// `close` was already called on this manager.
    #[error("connection manager is closed")]
    Closed,
}

/// Parts held until `open` hands them to the driver.
struct Idle {
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<ConnectionSnapshot>,
}

/// Owns one logical connection and its reconnect policy.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    config: ReconnectConfig,
    commands: mpsc::UnboundedSender<Command>,
    idle: Mutex<Option<Idle>>,
    observers: Arc<ObserverRegistry>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    target: Mutex<Option<Url>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create an idle manager. Nothing happens until [`open`](Self::open).
    #[must_use]
    pub fn new(connector: Arc<C>, config: ReconnectConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(ConnectionState::new().snapshot());
        Self {
            connector,
            config,
            commands,
            idle: Mutex::new(Some(Idle {
                commands: commands_rx,
                snapshot: snapshot_tx,
            })),
            observers: Arc::new(ObserverRegistry::default()),
            snapshot,
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
            target: Mutex::new(None),
        }
    }

    /// Add an observer for lifecycle events.
    pub fn register(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.register(observer);
    }

    /// Start connecting to `endpoint` as `identity` in the background.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::AlreadyOpened`] on a second call,
    /// [`ConnectionError::Closed`] after `close`,
    /// [`ConnectionError::MissingIdentity`] for an empty identity, and
    /// [`ConnectionError::InvalidTarget`] if the URL cannot be built.
    pub fn open(&self, endpoint: &Endpoint, identity: &Identity) -> Result<(), ConnectionError> {
        let target = endpoint.ws_url(identity)?;
        self.open_url(target)
    }

    /// Like [`open`](Self::open) with a prebuilt target URL.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_url(&self, target: Url) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let Some(idle) = self.idle.lock().take() else {
            warn!("open called twice on the same connection manager");
            return Err(ConnectionError::AlreadyOpened);
        };

        *self.target.lock() = Some(target.clone());
        let driver = Driver {
            connector: Arc::clone(&self.connector),
            target,
            config: self.config.clone(),
            state: ConnectionState::new(),
            commands: idle.commands,
            observers: Arc::clone(&self.observers),
            snapshot: idle.snapshot,
        };
        *self.task.lock() = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Transmit `frame`, or queue it until the link is open.
    ///
    /// Never fails because of disconnection. After `close` the frame is
    /// dropped.
    pub fn send(&self, frame: impl Into<String>) {
        if self.is_closed() {
            debug!("send after close ignored");
            return;
        }
        if self.commands.send(Command::Send(frame.into())).is_err() {
            debug!("connection task gone, frame dropped");
        }
    }

    /// Stop for good: cancel any pending reconnect and drop the link.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(idle) = self.idle.lock().take() {
            // Never opened: no driver to tell.
            let mut state = ConnectionState::new();
            state.close();
            idle.snapshot.send_replace(state.snapshot());
            return;
        }
        // The driver may already have exited; nothing else to stop then.
        let _ = self.commands.send(Command::Close);
    }

    /// Wait until the background task has fully stopped.
    pub async fn closed(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task ended abnormally");
            }
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current phase, attempt count and queue length.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.snapshot.borrow()
    }

    /// The URL passed to the connector, once opened.
    #[must_use]
    pub fn target(&self) -> Option<Url> {
        self.target.lock().clone()
    }
}
