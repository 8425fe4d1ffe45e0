//! Feed configuration
//!
//! Loaded from TOML or built in code with `with_*` methods. Every section is
//! optional.
//!
//! ```toml
//! endpoint = "wss://feed.example/changes"
//!
//! [reconnect]
//! initial_delay_ms = 500
//! max_delay_ms = 30000
//!
//! [log]
//! level = "debug"
//! format = "json"
//!
//! [view]
//! arrival_ttl_ms = 3000
//!
//! [collections.alerts]
//! aliases = ["tbl_alerts", "device_alerts"]
//! id_fields = ["alert_id", "id"]
//! ```

use crate::error::ConfigError;
use crate::telemetry::LogFormat;
use livesync_event::{EnvelopeNormalizer, IdExtractor};
use livesync_transport::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// WebSocket endpoint
    pub endpoint: Option<String>,
    /// Text frame sent after each connect
    pub subscribe_message: Option<String>,
    /// Reconnect timing
    pub reconnect: ReconnectConfig,
    /// Logging
    pub log: LogConfig,
    /// Collection view behavior
    pub view: ViewConfig,
    /// Extra collection mappings, keyed by collection name
    pub collections: BTreeMap<String, CollectionConfig>,
}

/// `[reconnect]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// First delay after a failure
    pub initial_delay_ms: u64,
    /// Delay cap
    pub max_delay_ms: u64,
    /// Growth factor
    pub multiplier: f64,
    /// ±25 % jitter
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    /// Transport policy
    #[must_use]
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter)
    }
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// `[view]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewConfig {
    /// How long the "just arrived" marker stays; 0 disables the marker
    pub arrival_ttl_ms: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            arrival_ttl_ms: 3_000,
        }
    }
}

impl ViewConfig {
    /// Marker lifetime, `None` when disabled
    #[must_use]
    pub fn arrival_ttl(&self) -> Option<Duration> {
        (self.arrival_ttl_ms > 0).then(|| Duration::from_millis(self.arrival_ttl_ms))
    }
}

/// `[collections.<name>]`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    /// Origin names that map to this collection
    pub aliases: Vec<String>,
    /// Identifier fields, in priority order
    pub id_fields: Vec<String>,
}

impl FeedConfig {
    /// Parse TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid config TOML or fails validation
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
                return Err(ConfigError::Invalid {
                    field: "endpoint",
                    reason: format!("expected ws:// or wss:// URL, got '{endpoint}'"),
                });
            }
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect.initial_delay_ms",
                reason: "must be positive".into(),
            });
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::Invalid {
                field: "reconnect.max_delay_ms",
                reason: "must not be below initial_delay_ms".into(),
            });
        }
        if !(self.reconnect.multiplier.is_finite() && self.reconnect.multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "reconnect.multiplier",
                reason: format!("must be >= 1.0, got {}", self.reconnect.multiplier),
            });
        }
        Ok(())
    }

    /// Set endpoint
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set subscribe message
    #[inline]
    #[must_use]
    pub fn with_subscribe_message(mut self, message: impl Into<String>) -> Self {
        self.subscribe_message = Some(message.into());
        self
    }

    /// Set reconnect timing
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set log level
    #[inline]
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log.level = level.into();
        self
    }

    /// Set log format
    #[inline]
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log.format = format;
        self
    }

    /// Set arrival marker lifetime
    #[inline]
    #[must_use]
    pub fn with_arrival_ttl(mut self, ttl: Duration) -> Self {
        self.view.arrival_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Add or replace a collection mapping
    #[inline]
    #[must_use]
    pub fn with_collection(mut self, name: impl Into<String>, collection: CollectionConfig) -> Self {
        self.collections.insert(name.into(), collection);
        self
    }

    /// Built-in normalizer extended with the configured collections
    #[must_use]
    pub fn normalizer(&self) -> EnvelopeNormalizer {
        let mut normalizer = EnvelopeNormalizer::new();
        for (name, collection) in &self.collections {
            normalizer.register_alias(name.clone(), name.clone());
            for alias in &collection.aliases {
                normalizer.register_alias(alias.clone(), name.clone());
            }
            if !collection.id_fields.is_empty() {
                normalizer.register_extractor(name.clone(), IdExtractor::new(&collection.id_fields));
            }
        }
        normalizer
    }
}
