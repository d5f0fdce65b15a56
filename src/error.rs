//! Error types for Nimbus
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling, plus the
//! classification rules that turn transport/HTTP failures into the
//! user-facing error banner shown by the embedding UI.

use thiserror::Error;

/// Main error type for Nimbus operations
///
/// This enum encompasses all possible errors that can occur while
/// talking to the agent endpoint, streaming its response, validating
/// user input, and persisting chat state.
#[derive(Error, Debug)]
pub enum NimbusError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failures (offline, connect failure, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// The agent endpoint answered with a 5xx status
    #[error("Server error: HTTP {status}")]
    Server {
        /// The HTTP status code returned by the endpoint
        status: u16,
    },

    /// The agent endpoint answered with a 4xx status
    #[error("Client error: HTTP {status}")]
    Client {
        /// The HTTP status code returned by the endpoint
        status: u16,
    },

    /// A response stream is already in flight for this client
    #[error("A response stream is already in flight")]
    Busy,

    /// Rate limit exceeded for message submission
    #[error("Rate limit exceeded: limit={limit}, retry in {retry_after_ms}ms")]
    RateLimited {
        /// The configured limit that was exceeded
        limit: usize,
        /// Milliseconds until the oldest request leaves the window
        retry_after_ms: u64,
    },

    /// User input rejected by validation
    #[error("Invalid message: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    /// Malformed persisted data or malformed stream bytes
    #[error("Decode error: {0}")]
    Decode(String),

    /// Chat state persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Nimbus operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Coarse error category used by the error banner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport-level failure; worth retrying
    Network,
    /// 5xx from the endpoint; worth retrying
    Server,
    /// 4xx from the endpoint; retrying will not help
    Client,
}

/// Human-readable view of an error, ready for display
///
/// The store and codec absorb their own failures; only network, server,
/// and client errors ever reach the user, always through this view.
#[derive(Debug, Clone)]
pub struct UserFacingError {
    /// Coarse category of the failure
    pub kind: ErrorKind,
    /// Short banner title
    pub title: String,
    /// One-sentence explanation for the user
    pub message: String,
    /// Whether a retry affordance should be offered
    pub can_retry: bool,
}

/// Classify a non-2xx HTTP status into a `NimbusError`
///
/// `>= 500` is a server error (retryable), `400..=499` a client error
/// (not retryable). Anything else unexpected is treated as a network
/// fault so the user gets a retry affordance.
///
/// # Examples
///
/// ```
/// use nimbus::error::{classify_status, NimbusError};
///
/// assert!(matches!(classify_status(503), NimbusError::Server { status: 503 }));
/// assert!(matches!(classify_status(404), NimbusError::Client { status: 404 }));
/// ```
pub fn classify_status(status: u16) -> NimbusError {
    if status >= 500 {
        NimbusError::Server { status }
    } else if (400..500).contains(&status) {
        NimbusError::Client { status }
    } else {
        NimbusError::Network(format!("unexpected HTTP status {}", status))
    }
}

impl NimbusError {
    /// Whether retrying the failed operation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            NimbusError::Network(_)
            | NimbusError::Server { .. }
            | NimbusError::Http(_)
            | NimbusError::Busy
            | NimbusError::RateLimited { .. } => true,
            NimbusError::Client { .. } | NimbusError::InvalidInput(_) => false,
            // Storage/decode failures are absorbed locally; if one ever
            // surfaces, offer a retry rather than a dead end.
            _ => true,
        }
    }

    /// Produce the display view for the error banner
    pub fn user_facing(&self) -> UserFacingError {
        match self {
            NimbusError::Server { .. } => UserFacingError {
                kind: ErrorKind::Server,
                title: "Server Error".to_string(),
                message: "Something went wrong. Please try again later.".to_string(),
                can_retry: true,
            },
            NimbusError::Client { .. } | NimbusError::InvalidInput(_) => UserFacingError {
                kind: ErrorKind::Client,
                title: "Request Error".to_string(),
                message: "Request invalid. Please try again.".to_string(),
                can_retry: false,
            },
            NimbusError::Http(e) if e.is_timeout() => UserFacingError {
                kind: ErrorKind::Network,
                title: "Connection Timeout".to_string(),
                message: "Connection lost. Please check your internet.".to_string(),
                can_retry: true,
            },
            NimbusError::Network(_) | NimbusError::Http(_) => UserFacingError {
                kind: ErrorKind::Network,
                title: "Network Error".to_string(),
                message: "Connection lost. Please check your internet.".to_string(),
                can_retry: true,
            },
            _ => UserFacingError {
                kind: ErrorKind::Network,
                title: "Connection Error".to_string(),
                message: "Connection lost. Please check your internet.".to_string(),
                can_retry: true,
            },
        }
    }
}
