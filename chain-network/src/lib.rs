//! In-process message transport
//!
//! This crate provides the message catalogue exchanged between committee
//! nodes and clients, and a hub that routes those messages between
//! registered endpoints through per-endpoint FIFO inboxes.

pub mod config;
pub mod error;
pub mod hub;
pub mod message;

pub use config::HubConfig;
pub use error::{NetworkError, NetworkResult};
pub use hub::{Destination, Endpoint, Envelope, LocalHub, MessageHub};
pub use message::NetworkMessage;
