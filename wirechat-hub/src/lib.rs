//! `WireChat` development hub.
//!
//! Accepts WebSocket connections, routes chat messages between users,
//! acknowledges delivery and serves message history over REST. Exposed as a
//! library so the client's tests can run it in-process.

pub mod config;
pub mod hub;
pub mod store;

/// Errors raised while starting the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Other socket errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
