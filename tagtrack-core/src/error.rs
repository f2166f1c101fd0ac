//! Error types for tagtrack operations

use std::fmt::Display;

use thiserror::Error;

/// Validation errors for inbound records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all tagtrack errors.
///
/// `NotFound` is an expected negative result. `StoreUnavailable` degrades
/// the cache to in-memory behaviour. `ProtocolDecode` and `ConnectionLost`
/// stay inside a connection's read loop. None of them is fatal to the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("Tag not found: {id}")]
    NotFound { id: String },

    #[error("Store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        operation: &'static str,
        reason: String,
    },

    #[error("Protocol decode error: {reason}")]
    ProtocolDecode { reason: String },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TagError {
    /// Tag or session absent.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Durable-store I/O failure during `operation`.
    pub fn store_unavailable(operation: &'static str, reason: impl Display) -> Self {
        Self::StoreUnavailable {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Malformed inbound frame.
    pub fn protocol_decode(reason: impl Display) -> Self {
        Self::ProtocolDecode {
            reason: reason.to_string(),
        }
    }

    /// Transport closed or failed.
    pub fn connection_lost(reason: impl Display) -> Self {
        Self::ConnectionLost {
            reason: reason.to_string(),
        }
    }

    /// Whether this is the expected "absent" result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for tagtrack operations.
pub type TagResult<T> = Result<T, TagError>;

// =============================================================================
// TESTS
// =============================================================================
