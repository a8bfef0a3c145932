//! Shared wire definitions for `WireChat`: the message frame, its JSON codec,
//! and the REST records served alongside the socket.

pub mod codec;
pub mod message;
pub mod records;
