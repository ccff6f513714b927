//! Pricing cache error types.

use std::sync::Arc;

use config_store::StoreError;
use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, PricingError>;

/// Errors surfaced by the pricing cache.
///
/// Cloneable so one refresh outcome can be handed to every caller waiting on it;
/// store errors are shared through an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum PricingError {
    /// Reading the configuration table failed.
    #[error("Failed to fetch pricing configuration: {0}")]
    ConfigFetch(#[source] Arc<StoreError>),

    /// A fetched value is not a number (strict parsing only).
    #[error("Invalid value for pricing key {key:?}: {value:?} is not a number")]
    ConfigParse { key: String, value: String },

    /// The change feed could not be established.
    #[error("Failed to subscribe to pricing changes: {0}")]
    Subscription(#[source] Arc<StoreError>),

    /// The caller driving a shared refresh went away before it finished.
    #[error("Pricing refresh was abandoned before it completed")]
    RefreshAbandoned,
}

impl PricingError {
    pub fn fetch(err: StoreError) -> Self {
        Self::ConfigFetch(Arc::new(err))
    }

    pub fn subscription(err: StoreError) -> Self {
        Self::Subscription(Arc::new(err))
    }

    pub fn parse(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ConfigParse {
            key: key.into(),
            value: value.into(),
        }
    }
}
