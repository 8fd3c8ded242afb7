//! Relay configuration.
//!
//! Resolved in three layers: built-in defaults, an optional JSON file, then
//! `RELAY_*` environment variables.
//!
//! Example `relay.json`:
//! ```json
//! {
//!   "port": 3001,
//!   "api_token": "change-me",
//!   "backend": { "base_url": "https://backend.example/api", "timeout_ms": 5000 },
//!   "reconnect": { "max_attempts": 10, "base_delay_ms": 5000, "max_delay_ms": 60000 },
//!   "memory": { "ceiling_mb": 450 },
//!   "queue": { "capacity": 100 }
//! }
//! ```

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::templates::AutoReply;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Backend notification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend API. Empty disables notifications.
    pub base_url: String,
    /// Bearer token for the backend. Falls back to the relay's own API token.
    pub token: Option<String>,
    pub timeout_ms: u64,
    /// Path segment inserted between the base URL and the event name.
    pub event_prefix: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout_ms: 5_000,
            event_prefix: "whatsapp".to_string(),
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Reconnect backoff limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
        }
    }
}

/// Memory ceiling enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub ceiling_mb: u64,
    pub sample_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ceiling_mb: 450,
            sample_interval_ms: 60_000,
        }
    }
}

/// Inbound message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    /// Pause between two handled entries.
    pub pacing_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            pacing_ms: 100,
        }
    }
}

/// Fully resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Token required on `/api/*` requests.
    pub api_token: String,
    pub service_name: String,
    /// Directory receiving the pairing-code artifact.
    pub artifacts_dir: PathBuf,
    pub keep_alive_ms: u64,
    /// Upper bound on one session-client `start` or `destroy` call.
    pub client_timeout_ms: u64,
    pub backend: BackendConfig,
    pub reconnect: ReconnectConfig,
    pub memory: MemoryConfig,
    pub queue: QueueConfig,
    pub auto_reply: AutoReply,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            api_token: String::new(),
            service_name: "Session Relay".to_string(),
            artifacts_dir: PathBuf::from("public"),
            keep_alive_ms: 30_000,
            client_timeout_ms: 60_000,
            backend: BackendConfig::default(),
            reconnect: ReconnectConfig::default(),
            memory: MemoryConfig::default(),
            queue: QueueConfig::default(),
            auto_reply: AutoReply::default(),
        }
    }
}

impl RelayConfig {
    /// Load the configuration: defaults, then `path` if given, then the process environment.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `RELAY_*` overrides obtained through `lookup`.
    ///
    /// # Errors
    /// Returns error if a numeric override does not parse.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RELAY_HOST") {
            self.host = v;
        }
        override_parsed(&lookup, "RELAY_PORT", &mut self.port)?;
        if let Some(v) = lookup("RELAY_API_TOKEN") {
            self.api_token = v;
        }
        if let Some(v) = lookup("RELAY_SERVICE_NAME") {
            self.service_name = v;
        }
        if let Some(v) = lookup("RELAY_ARTIFACTS_DIR") {
            self.artifacts_dir = PathBuf::from(v);
        }
        override_parsed(&lookup, "RELAY_KEEP_ALIVE_MS", &mut self.keep_alive_ms)?;
        override_parsed(&lookup, "RELAY_CLIENT_TIMEOUT_MS", &mut self.client_timeout_ms)?;

        if let Some(v) = lookup("RELAY_BACKEND_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = lookup("RELAY_BACKEND_TOKEN") {
            self.backend.token = Some(v);
        }
        if let Some(v) = lookup("RELAY_EVENT_PREFIX") {
            self.backend.event_prefix = v;
        }
        override_parsed(&lookup, "RELAY_BACKEND_TIMEOUT_MS", &mut self.backend.timeout_ms)?;

        override_parsed(
            &lookup,
            "RELAY_RECONNECT_MAX_ATTEMPTS",
            &mut self.reconnect.max_attempts,
        )?;
        override_parsed(
            &lookup,
            "RELAY_RECONNECT_BASE_DELAY_MS",
            &mut self.reconnect.base_delay_ms,
        )?;
        override_parsed(
            &lookup,
            "RELAY_RECONNECT_MAX_DELAY_MS",
            &mut self.reconnect.max_delay_ms,
        )?;

        override_parsed(&lookup, "RELAY_MEMORY_CEILING_MB", &mut self.memory.ceiling_mb)?;
        override_parsed(
            &lookup,
            "RELAY_MEMORY_SAMPLE_MS",
            &mut self.memory.sample_interval_ms,
        )?;

        override_parsed(&lookup, "RELAY_QUEUE_CAPACITY", &mut self.queue.capacity)?;
        override_parsed(&lookup, "RELAY_QUEUE_PACING_MS", &mut self.queue.pacing_ms)?;

        Ok(self)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::Invalid("api_token must be set"));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid("reconnect.max_attempts must be positive"));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.base_delay_ms must be positive"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must not be below base_delay_ms",
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be positive"));
        }
        if self.keep_alive_ms == 0
            || self.memory.sample_interval_ms == 0
            || self.client_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("intervals must be positive"));
        }
        if self.backend.timeout_ms == 0 {
            return Err(ConfigError::Invalid("backend.timeout_ms must be positive"));
        }
        if self.memory.ceiling_mb == 0 {
            return Err(ConfigError::Invalid("memory.ceiling_mb must be positive"));
        }
        Ok(())
    }

    /// Token sent to the backend.
    #[must_use]
    pub fn backend_token(&self) -> &str {
        self.backend.token.as_deref().unwrap_or(&self.api_token)
    }

    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    #[must_use]
    pub const fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn override_parsed<F, T>(lookup: &F, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.reconnect.base_delay_ms, 5_000);
        assert_eq!(config.reconnect.max_delay_ms, 60_000);
        assert_eq!(config.memory.ceiling_mb, 450);
        assert_eq!(config.backend.timeout_ms, 5_000);
        assert_eq!(config.client_timeout_ms, 60_000);
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let err = RelayConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("api_token"));
    }

    #[test]
    fn test_env_overrides() {
        let config = RelayConfig::default()
            .apply_overrides(env(&[
                ("RELAY_PORT", "8080"),
                ("RELAY_API_TOKEN", "secret"),
                ("RELAY_BACKEND_URL", "http://backend.test/api"),
                ("RELAY_QUEUE_CAPACITY", " 5 "),
                ("RELAY_CLIENT_TIMEOUT_MS", "2500"),
            ]))
            .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.api_token, "secret");
        assert_eq!(config.backend_token(), "secret");
        assert_eq!(config.backend.base_url, "http://backend.test/api");
        assert_eq!(config.queue.capacity, 5);
        assert_eq!(config.client_timeout(), Duration::from_millis(2_500));
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_number_names_variable() {
        let err = RelayConfig::default()
            .apply_overrides(env(&[("RELAY_MEMORY_CEILING_MB", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "RELAY_MEMORY_CEILING_MB",
                ..
            }
        ));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{ "api_token": "t", "reconnect": { "max_attempts": 3 } }"#,
        )
        .unwrap();

        let config = RelayConfig::from_file(&path).unwrap();
        assert_eq!(config.api_token, "t");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 5_000);
        assert_eq!(config.queue.capacity, 100);
    }

    #[test]
    fn test_max_delay_below_base_is_rejected() {
        let mut config = RelayConfig {
            api_token: "t".into(),
            ..RelayConfig::default()
        };
        config.reconnect.max_delay_ms = 10;
        assert!(config.validate().is_err());
    }
}
