//! WebSocket transport built on tokio-tungstenite.
//!
//! Frames travel as WebSocket text messages. Binary messages are accepted if
//! they hold valid UTF-8; ping/pong is answered by tungstenite itself.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, FrameSink, FrameSource, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector that dials `ws://` and `wss://` targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Write half of a WebSocket link.
pub struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

/// Read half of a WebSocket link.
pub struct WsSource {
    inner: SplitStream<WsStream>,
    /// Set after a read error; the stream is not polled again.
    failed: bool,
}

impl Connector for WsConnector {
    type Sink = WsSink;
    type Source = WsSource;

    async fn connect(&self, target: &Url) -> Result<(WsSink, WsSource), TransportError> {
        let host = target.host_str().unwrap_or_default().to_string();
        let (stream, _response) = connect_async(target.as_str()).await.map_err(|e| {
            tracing::warn!(host = %host, err = %e, "websocket connect failed");
            map_ws_connect_error(&host, e)
        })?;
        let (sink, source) = stream.split();
        tracing::debug!(host = %host, "websocket handshake complete");
        Ok((
            WsSink { inner: sink },
            WsSource {
                inner: source,
                failed: false,
            },
        ))
    }
}

impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            tracing::debug!(err = %e, "websocket close handshake failed");
        }
    }
}

impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        if self.failed {
            return None;
        }
        while let Some(item) = self.inner.next().await {
            match item {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    return Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|e| TransportError::MalformedFrame(e.to_string())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "close frame received");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(TransportError::WebSocket(e.to_string())));
                }
            }
        }
        None
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(host: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::AddrNotAvailable
                    | std::io::ErrorKind::NotFound
            ) =>
        {
            TransportError::Unreachable(host.to_string())
        }
        WsError::Http(response) => TransportError::Rejected(response.status().as_u16()),
        other => TransportError::WebSocket(other.to_string()),
    }
}
