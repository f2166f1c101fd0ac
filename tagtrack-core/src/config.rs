//! Runtime configuration
//!
//! Loaded from `TAGTRACK_*` environment variables with defaults suited to a
//! local development setup. Call [`TagtrackConfig::validate`] before use.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{ConfigError, TagResult};

/// Default base address tag URLs are derived from.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8081";

/// Default listener for peer notification connections.
pub const DEFAULT_NOTIFY_BIND: &str = "127.0.0.1:4242";

/// Default heartbeat sentinel.
pub const DEFAULT_HEARTBEAT_TOKEN: &str = "|beat|";

/// Certificate material for the mutually-authenticated peer listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub client_ca_path: PathBuf,
}

/// Runtime configuration shared by the cache, journal and connection plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagtrackConfig {
    /// Base address; a tag's URL is `{base_url}/{id}`.
    pub base_url: String,

    /// Bind address for peer connections.
    pub notify_bind: String,

    // ========================================================================
    // TLS (all three or none)
    // ========================================================================
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_client_ca: Option<PathBuf>,

    // ========================================================================
    // Notification protocol
    // ========================================================================
    /// Literal frame that is recognised and discarded.
    pub heartbeat_token: String,

    /// Close a connection that sends no frame for this long. `None` disables.
    pub idle_timeout: Option<Duration>,

    /// Longest accepted frame, excluding the newline.
    pub max_frame_bytes: usize,

    // ========================================================================
    // Delivery and persistence
    // ========================================================================
    /// Buffered outbound frames per session.
    pub outbound_queue: usize,

    /// Bound on a single write to one peer.
    pub write_timeout: Duration,

    /// Pending durable access-log appends.
    pub access_queue: usize,

    /// Bound on a single durable access-log append.
    pub store_timeout: Duration,

    /// Capacity of the tag event channel.
    pub event_capacity: usize,
}

impl Default for TagtrackConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            notify_bind: DEFAULT_NOTIFY_BIND.to_string(),
            tls_cert: None,
            tls_key: None,
            tls_client_ca: None,
            heartbeat_token: DEFAULT_HEARTBEAT_TOKEN.to_string(),
            idle_timeout: Some(Duration::from_secs(90)),
            max_frame_bytes: 4096,
            outbound_queue: 64,
            write_timeout: Duration::from_millis(5000),
            access_queue: 1024,
            store_timeout: Duration::from_millis(2000),
            event_capacity: 256,
        }
    }
}

impl TagtrackConfig {
    /// Create TagtrackConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TAGTRACK_BASE_URL`: Base address for tag URLs (default: http://localhost:8081)
    /// - `TAGTRACK_NOTIFY_BIND`: Peer listener address (default: 127.0.0.1:4242)
    /// - `TAGTRACK_TLS_CERT` / `TAGTRACK_TLS_KEY` / `TAGTRACK_TLS_CLIENT_CA`: mTLS material
    /// - `TAGTRACK_HEARTBEAT_TOKEN`: Heartbeat sentinel (default: |beat|)
    /// - `TAGTRACK_IDLE_TIMEOUT_SECS`: Session liveness timeout, 0 disables (default: 90)
    /// - `TAGTRACK_MAX_FRAME_BYTES`: Longest accepted frame (default: 4096)
    /// - `TAGTRACK_OUTBOUND_QUEUE`: Per-session outbound queue (default: 64)
    /// - `TAGTRACK_WRITE_TIMEOUT_MS`: Per-peer write timeout (default: 5000)
    /// - `TAGTRACK_ACCESS_QUEUE`: Pending access-log appends (default: 1024)
    /// - `TAGTRACK_STORE_TIMEOUT_MS`: Access-log append timeout (default: 2000)
    /// - `TAGTRACK_EVENT_CAPACITY`: Tag event channel capacity (default: 256)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| text(key).and_then(|v| v.parse::<u64>().ok());

        let idle_timeout = match number("TAGTRACK_IDLE_TIMEOUT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_timeout,
        };

        Self {
            base_url: text("TAGTRACK_BASE_URL").unwrap_or(defaults.base_url),
            notify_bind: text("TAGTRACK_NOTIFY_BIND").unwrap_or(defaults.notify_bind),
            tls_cert: text("TAGTRACK_TLS_CERT").map(PathBuf::from),
            tls_key: text("TAGTRACK_TLS_KEY").map(PathBuf::from),
            tls_client_ca: text("TAGTRACK_TLS_CLIENT_CA").map(PathBuf::from),
            heartbeat_token: text("TAGTRACK_HEARTBEAT_TOKEN").unwrap_or(defaults.heartbeat_token),
            idle_timeout,
            max_frame_bytes: number("TAGTRACK_MAX_FRAME_BYTES")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_frame_bytes),
            outbound_queue: number("TAGTRACK_OUTBOUND_QUEUE")
                .map(|v| v as usize)
                .unwrap_or(defaults.outbound_queue),
            write_timeout: number("TAGTRACK_WRITE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_timeout),
            access_queue: number("TAGTRACK_ACCESS_QUEUE")
                .map(|v| v as usize)
                .unwrap_or(defaults.access_queue),
            store_timeout: number("TAGTRACK_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            event_capacity: number("TAGTRACK_EVENT_CAPACITY")
                .map(|v| v as usize)
                .unwrap_or(defaults.event_capacity),
        }
    }

    /// TLS material, if configured. A partial set is an error.
    pub fn tls(&self) -> TagResult<Option<TlsPaths>> {
        match (&self.tls_cert, &self.tls_key, &self.tls_client_ca) {
            (None, None, None) => Ok(None),
            (Some(cert), Some(key), Some(ca)) => Ok(Some(TlsPaths {
                cert_path: cert.clone(),
                key_path: key.clone(),
                client_ca_path: ca.clone(),
            })),
            (cert, key, _) => {
                let field = if cert.is_none() {
                    "TAGTRACK_TLS_CERT"
                } else if key.is_none() {
                    "TAGTRACK_TLS_KEY"
                } else {
                    "TAGTRACK_TLS_CLIENT_CA"
                };
                Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                }
                .into())
            }
        }
    }

    /// Parsed peer listener address.
    pub fn notify_addr(&self) -> TagResult<SocketAddr> {
        self.notify_bind.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue {
                field: "notify_bind".to_string(),
                value: self.notify_bind.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TagResult<()> {
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "base_url".to_string(),
            }
            .into());
        }

        self.notify_addr()?;
        self.tls()?;

        if self.heartbeat_token.contains('\n') {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_token".to_string(),
                value: self.heartbeat_token.clone(),
                reason: "heartbeat token cannot span frames".to_string(),
            }
            .into());
        }

        if self.max_frame_bytes < self.heartbeat_token.len() {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "max_frame_bytes".to_string(),
                option_b: "heartbeat_token".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("outbound_queue", self.outbound_queue),
            ("access_queue", self.access_queue),
            ("event_capacity", self.event_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: format!("{field} must be greater than 0"),
                }
                .into());
            }
        }

        if self.write_timeout.is_zero() || self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "write_timeout/store_timeout".to_string(),
                value: format!("{:?}/{:?}", self.write_timeout, self.store_timeout),
                reason: "timeouts must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TagError;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> TagtrackConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TagtrackConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_pairs(&[]);
        assert_eq!(config, TagtrackConfig::default());
        config.validate().unwrap();
        assert!(config.tls().unwrap().is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = from_pairs(&[
            ("TAGTRACK_BASE_URL", "https://tags.example"),
            ("TAGTRACK_IDLE_TIMEOUT_SECS", "30"),
            ("TAGTRACK_MAX_FRAME_BYTES", "1024"),
            ("TAGTRACK_WRITE_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(config.base_url, "https://tags.example");
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.write_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_idle_timeout_disables_liveness() {
        let config = from_pairs(&[("TAGTRACK_IDLE_TIMEOUT_SECS", "0")]);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_unparsable_number_falls_back() {
        let config = from_pairs(&[("TAGTRACK_OUTBOUND_QUEUE", "lots")]);
        assert_eq!(config.outbound_queue, 64);
    }

    #[test]
    fn test_partial_tls_is_rejected() {
        let config = from_pairs(&[
            ("TAGTRACK_TLS_CERT", "/etc/tagtrack/server.crt"),
            ("TAGTRACK_TLS_CLIENT_CA", "/etc/tagtrack/ca.crt"),
        ]);
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            TagError::Config(ConfigError::MissingRequired {
                field: "TAGTRACK_TLS_KEY".to_string()
            })
        );
    }

    #[test]
    fn test_full_tls_is_accepted() {
        let config = from_pairs(&[
            ("TAGTRACK_TLS_CERT", "server.crt"),
            ("TAGTRACK_TLS_KEY", "server.key"),
            ("TAGTRACK_TLS_CLIENT_CA", "ca.crt"),
        ]);
        let tls = config.tls().unwrap().unwrap();
        assert_eq!(tls.key_path, PathBuf::from("server.key"));
    }

    #[test]
    fn test_bad_bind_address_is_rejected() {
        let config = from_pairs(&[("TAGTRACK_NOTIFY_BIND", "not-an-addr")]);
        assert!(matches!(config.validate(), Err(TagError::Config(_))));
    }

    #[test]
    fn test_zero_queue_is_rejected() {
        let config = TagtrackConfig {
            outbound_queue: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
