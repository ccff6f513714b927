//! Realtime change feed over Phoenix channels.
//!
//! The store pushes `postgres_changes` frames over a WebSocket once a channel
//! for the table has been joined. Only `UPDATE`s on the configured table are
//! forwarded.

mod channel;
pub mod message;

pub(crate) use channel::open_feed;
pub use message::{Inbound, PhoenixMessage};
