//! Server-level errors.
//!
//! Tag operations report [`TagError`]. `ServerError` covers what can go wrong
//! while standing the process up: binding, TLS material, telemetry and
//! metrics registration. Accept failures on the outer listener are the only
//! runtime errors allowed to stop the service.

use std::path::Path;

use tagtrack_core::TagError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("TLS material error for {path}: {reason}")]
    TlsMaterial { path: String, reason: String },

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Telemetry initialization failed: {0}")]
    Telemetry(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Tag(#[from] TagError),
}

impl ServerError {
    /// Error reading or parsing a PEM file.
    pub fn tls_material(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::TlsMaterial {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for server setup.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_tls_material_names_path() {
        let err = ServerError::tls_material(&PathBuf::from("/etc/tagtrack/ca.pem"), "empty");
        let msg = err.to_string();
        assert!(msg.contains("/etc/tagtrack/ca.pem"));
        assert!(msg.contains("empty"));
    }

    #[test]
    fn test_tag_error_is_transparent() {
        let err: ServerError = TagError::not_found("t1").into();
        assert_eq!(err.to_string(), "Tag not found: t1");
    }
}
