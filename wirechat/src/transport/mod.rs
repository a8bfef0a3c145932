//! Transport seam for the connection manager.
//!
//! A [`Connector`] turns a target URL into a pair of halves: a [`FrameSink`]
//! for outbound text frames and a [`FrameSource`] for inbound ones. The
//! connection manager owns both halves from a single task, so neither half
//! needs to be shareable.
//!
//! Implementations:
//! - [`websocket::WsConnector`]: tokio-tungstenite client used in production
//! - [`loopback::LoopbackConnector`]: in-process connector for tests

pub mod loopback;
pub mod websocket;

use std::future::Future;

use url::Url;

/// Errors reported by a transport.
///
/// Cloneable so a single error can be fanned out to every observer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The link has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// The server answered the upgrade request with an HTTP error.
    #[error("handshake rejected with status {0}")]
    Rejected(u16),

    /// A WebSocket protocol or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// An inbound frame was not valid text.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Outbound half of an established link.
pub trait FrameSink: Send + 'static {
    /// Write one text frame.
    ///
    /// An error means the frame was not written and the link is unusable.
    fn send_frame(
        &mut self,
        frame: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Start a graceful close of the link. Failures are ignored.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Inbound half of an established link.
pub trait FrameSource: Send + 'static {
    /// Receive the next text frame.
    ///
    /// Returns `None` once the link is closed. `Some(Err(_))` reports a
    /// non-fatal problem with one frame. Must be cancel-safe: the connection
    /// manager drops this future whenever a command arrives first.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;
}

/// Establishes links to a target URL.
pub trait Connector: Send + Sync + 'static {
    /// Outbound half type.
    type Sink: FrameSink;
    /// Inbound half type.
    type Source: FrameSource;

    /// Open a new link to `target`.
    fn connect(
        &self,
        target: &Url,
    ) -> impl Future<Output = Result<(Self::Sink, Self::Source), TransportError>> + Send;
}
