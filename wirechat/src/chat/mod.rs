//! Chat application layer.
//!
//! Holds the [`store::ReconciliationStore`], which turns history, live
//! frames and optimistic sends into one duplicate-free timeline per peer.

pub mod store;

pub use store::{Applied, DeliveryState, ReconciliationStore};
