//! Runtime configuration for the sync engine.
//!
//! Loaded from a JSON file and then overridden from the environment
//! (`API_BASE_URL`, `API_AUTH_TOKEN`, `PARKLINE_API_TIMEOUT_SECS`).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_API_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_AUTO_SYNC_SECS: u64 = 60;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;
const DEFAULT_DRAIN_LEASE_SECS: u64 = 60;

pub const ENV_API_BASE_URL: &str = "API_BASE_URL";
pub const ENV_API_AUTH_TOKEN: &str = "API_AUTH_TOKEN";
pub const ENV_API_TIMEOUT_SECS: &str = "PARKLINE_API_TIMEOUT_SECS";

/// Remote API paths, relative to `ApiConfig::base_url`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Endpoints {
    pub vehicle_search: String,
    pub vehicle_register: String,
    pub ticket_create: String,
    pub infraction_create: String,
    /// Photos are posted to `{infraction_photos}/{infraction_id}`
    pub infraction_photos: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            vehicle_search: "/api/vehicles/search".to_string(),
            vehicle_register: "/api/vehicles".to_string(),
            ticket_create: "/api/tickets".to_string(),
            infraction_create: "/api/infractions".to_string(),
            infraction_photos: "/api/infractions/photos".to_string(),
        }
    }
}

/// Remote API connection settings
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer credential sent with every request
    pub auth_token: Option<String>,
    /// Bounded wait for a single request
    pub timeout_secs: u64,
    pub endpoints: Endpoints,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_token: None,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            endpoints: Endpoints::default(),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl ApiConfig {
    /// Create a config for the given base URL with default endpoints
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the bearer credential
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = normalize_text_option(Some(token.into()));
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash, validated to be http(s)
    pub fn normalized_base_url(&self) -> Result<String> {
        let base_url = normalize_text_option(Some(self.base_url.clone()))
            .ok_or_else(|| Error::Config("api base_url must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::Config(
                "api base_url must include http:// or https://".to_string(),
            ));
        }
        Ok(base_url.trim_end_matches('/').to_string())
    }
}

/// Drain policy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Failed submissions allowed before a record is dead-lettered (`None`: retry forever)
    pub max_attempts: Option<u32>,
    /// Periodic drain interval while online (`None`: reconnect and manual only)
    pub auto_sync_interval_secs: Option<u64>,
    /// Reachability probe interval
    pub probe_interval_secs: u64,
    /// Lifetime of the cross-process drain lease after its last renewal
    pub drain_lease_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            auto_sync_interval_secs: Some(DEFAULT_AUTO_SYNC_SECS),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            drain_lease_secs: DEFAULT_DRAIN_LEASE_SECS,
        }
    }
}

impl SyncConfig {
    /// Set the periodic drain interval
    #[must_use]
    pub const fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval_secs = Some(interval.as_secs());
        self
    }

    /// Disable periodic drains (reconnect and manual only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.auto_sync_interval_secs = None;
        self
    }

    /// Set the dead-letter threshold
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.auto_sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub const fn drain_lease(&self) -> Duration {
        Duration::from_secs(self.drain_lease_secs)
    }
}

/// Complete on-disk configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ParklineConfig {
    pub api: ApiConfig,
    pub sync: SyncConfig,
}

impl ParklineConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!("failed to parse {}: {error}", path.display()))
        })
    }

    /// Load from `path` and apply process environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_path(path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base_url) = normalize_text_option(lookup(ENV_API_BASE_URL)) {
            self.api.base_url = base_url;
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_AUTH_TOKEN)) {
            self.api.auth_token = Some(token);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_API_TIMEOUT_SECS)) {
            self.api.timeout_secs = raw.parse().map_err(|_| {
                Error::Config(format!("{ENV_API_TIMEOUT_SECS} must be a number of seconds"))
            })?;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.api.normalized_base_url()?;
        if self.api.timeout_secs == 0 {
            return Err(Error::Config("api timeout_secs must be positive".to_string()));
        }
        if self.sync.max_attempts == Some(0) {
            return Err(Error::Config("sync max_attempts must be positive".to_string()));
        }
        if self.sync.drain_lease_secs <= self.api.timeout_secs {
            return Err(Error::Config(
                "sync drain_lease_secs must exceed api timeout_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
