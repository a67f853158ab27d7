//! Forwarding handler: parse, apply the status policy, `PUT` downstream.
//!
//! ```text
//! raw payload → prepare() → Forwarder::handle() → Delivered | HandleError
//! ```

pub mod client;
pub mod order;

pub use client::{Delivered, ForwardOptions, Forwarder};
pub use order::{prepare, OrderUpdate, PreparedUpdate, StatusPolicy, RECEIVED_STATUS};
