//! Error types for draftpane.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of characters of raw error detail shown in a status line.
pub const MAX_ERROR_DETAIL_CHARS: usize = 200;

/// Name/message fragments that mark an error as a transient network failure.
const TRANSIENT_MARKERS: &[&str] = &[
    "abort",
    "network",
    "connection",
    "connect",
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "reset by peer",
    "failed to fetch",
    "fetch",
];

/// A shared error type for the whole draftpane workspace.
///
/// Variants carry enough identifying information (name and message) for the
/// operation registry to classify a failure without knowing which layer
/// produced it.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DraftError {
    /// Transport-level failure talking to a remote service.
    #[error("{name}: {message}")]
    Network { name: String, message: String },

    /// The operation was cancelled locally.
    #[error("Request cancelled")]
    Cancelled,

    /// The drafting service answered with an error status.
    #[error("Drafting service error{}: {message}", status_suffix(.status_code))]
    Service {
        status_code: Option<u16>,
        message: String,
        is_retryable: bool,
    },

    /// The drafting service answered, but not with something we understand.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Storage surface failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A pane operation was requested while no conversation is open.
    #[error("No conversation is active")]
    NoActiveConversation,

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the operation registry treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Retry-eligible, e.g. a dropped connection.
    Transient,
    /// Local or user cancellation. Never counted as a failure.
    Cancelled,
    /// Everything else.
    Terminal,
}

impl DraftError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Network error
    pub fn network(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a MalformedResponse error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    // ============================================================================
    // Classification
    // ============================================================================

    /// Check if this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classifies the error for the retry policy.
    ///
    /// Network errors are matched by name/message heuristics, so a transport
    /// that reports everything as `Network` still gets terminal treatment for
    /// failures that are not connection-shaped.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Cancelled => FailureKind::Cancelled,
            Self::Network { name, message } => {
                if looks_transient(name) || looks_transient(message) {
                    FailureKind::Transient
                } else {
                    FailureKind::Terminal
                }
            }
            Self::Service { is_retryable, .. } if *is_retryable => FailureKind::Transient,
            _ => FailureKind::Terminal,
        }
    }

    /// Short, human-readable text for a status line.
    ///
    /// Raw detail is truncated to [`MAX_ERROR_DETAIL_CHARS`], never dropped.
    pub fn status_text(&self) -> String {
        truncate_detail(&self.to_string(), MAX_ERROR_DETAIL_CHARS)
    }
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map(|c| format!(" ({c})")).unwrap_or_default()
}

fn looks_transient(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Truncates `detail` to at most `max_chars` characters, appending an
/// ellipsis when something was cut.
pub fn truncate_detail(detail: &str, max_chars: usize) -> String {
    let trimmed = detail.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for DraftError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for DraftError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DraftError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for DraftError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("TimeoutError", err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::network("NetworkError", err.to_string())
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Service {
                status_code: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
                is_retryable: false,
            }
        }
    }
}

/// Conversion from anyhow::Error (for collaborators that report untyped errors)
impl From<anyhow::Error> for DraftError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, DraftError>`.
pub type Result<T> = std::result::Result<T, DraftError>;
