//! Configuration store error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while talking to the configuration store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Missing or invalid store settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid store url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Transport-level failure of a REST request.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The change feed could not be established.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Unexpected realtime frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The store is not reachable (used by the in-memory store).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
