//! Access to the pricing configuration table.
//!
//! The table holds `(config_key, config_value)` text rows. This crate exposes
//! it through the [`ConfigStore`] trait with two implementations:
//!
//! - [`SupabaseStore`]: REST reads plus a realtime WebSocket change feed
//! - [`InMemoryConfigStore`]: process-local rows for development and tests

pub mod error;
pub mod memory;
pub mod realtime;
pub mod rest;
pub mod row;
pub mod settings;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryConfigStore;
pub use rest::SupabaseStore;
pub use row::{ChangeEvent, ConfigRow};
pub use settings::StoreSettings;
pub use store::{ChangeFeed, ConfigStore};
