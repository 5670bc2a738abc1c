//! Error types for the depth-recorder crate.
//!
//! This module defines the errors that can occur while talking to the
//! exchange, validating incoming messages, and persisting flushed batches.
//! Recoverable anomalies of the synchronization engine (stale replays,
//! crossed books, unknown symbols) are reported as
//! [`SyncAction`](crate::orderbook::SyncAction) outcomes instead.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Exchange returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// Message failed ingress validation
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Persisting a batch failed
    #[error("Persistence error writing {}: {source}", path.display())]
    Persistence {
        /// Path relative to the sink root
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Epoch seconds out of the representable range
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Snapshot fetch kept failing during bootstrap
    #[error("Bootstrap of {symbol} failed after {attempts} attempts: {last_error}")]
    Bootstrap {
        /// Symbol that could not be bootstrapped
        symbol: String,
        /// Number of snapshot fetches attempted
        attempts: u32,
        /// Message of the last failure
        last_error: String,
    },
}

/// Error returned by the exchange REST API
///
/// Binance error bodies look like `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Exchange error code (if provided)
    pub code: Option<i64>,
    /// Error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an exchange error code
    pub fn with_code(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl Error {
    /// Whether retrying the same request later can succeed.
    ///
    /// Used by the bootstrap loop to decide between backing off and giving up.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_)
            | Error::WebSocket(_)
            | Error::ConnectionClosed
            | Error::RateLimited { .. } => true,
            Error::Api(api) => api.is_server_error(),
            _ => false,
        }
    }
}
