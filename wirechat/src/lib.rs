//! `WireChat`: resilient real-time messaging client library.

pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod connection;
pub mod session;
pub mod transport;
