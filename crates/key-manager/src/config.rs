//! Configuration loading and validation for the key manager.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any variable is invalid.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::manager::ManagerSettings;
use crate::ohttp::EncryptorSettings;
use crate::refresh::RefreshSettings;

/// Validated key manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default URI serving auction key sets.
    #[serde(default = "default_auction_key_fetch_uri")]
    pub auction_key_fetch_uri: String,

    /// Default URI serving the join key config.
    #[serde(default = "default_join_key_fetch_uri")]
    pub join_key_fetch_uri: String,

    /// Comma-separated coordinator URLs callers may pin a key fetch to.
    #[serde(default)]
    pub coordinator_url_allowlist: String,

    /// Route fetches through the coordinator allow-list and store keys per coordinator.
    #[serde(default)]
    pub multi_coordinator_enabled: bool,

    /// Number of redundant auction keys to select between.
    #[serde(default = "default_auction_key_sharding")]
    pub auction_key_sharding: usize,

    /// Key lifetime used when the server gives no usable `Cache-Control`, and
    /// for every join key.
    #[serde(default = "default_encryption_key_max_age_secs")]
    pub encryption_key_max_age_secs: u64,

    /// Per-fetch timeout used by the background refresh.
    #[serde(default = "default_key_fetch_timeout_ms")]
    pub key_fetch_timeout_ms: u64,

    /// Largest key fetch response body accepted.
    #[serde(default = "default_key_fetch_max_response_bytes")]
    pub key_fetch_max_response_bytes: usize,

    /// Use the `message/auction` OHTTP labels for auction requests.
    #[serde(default)]
    pub media_type_change_enabled: bool,

    /// Delete a stored key as soon as it fails key-config parsing.
    #[serde(default)]
    pub purge_invalid_keys: bool,

    /// Master switch for the background refresh.
    #[serde(default = "default_true")]
    pub background_refresh_enabled: bool,

    #[serde(default = "default_true")]
    pub background_auction_refresh_enabled: bool,

    #[serde(default = "default_true")]
    pub background_join_refresh_enabled: bool,

    /// How often (seconds) the background refresh runs.
    #[serde(default = "default_background_refresh_interval")]
    pub background_refresh_interval_secs: u64,

    /// Upper bound on one background refresh pass.
    #[serde(default = "default_background_refresh_max_runtime_ms")]
    pub background_refresh_max_runtime_ms: u64,

    /// Refresh keys that will expire within `fetch_in_advance_interval_ms`.
    #[serde(default)]
    pub fetch_in_advance_enabled: bool,

    #[serde(default = "default_fetch_in_advance_interval_ms")]
    pub fetch_in_advance_interval_ms: u64,

    /// redb database file holding keys and request contexts.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// OTLP endpoint. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_auction_key_fetch_uri() -> String {
    "https://publickeyservice.pa.gcp.privacysandboxservices.com/.well-known/protected-auction/v1/public-keys".into()
}
fn default_join_key_fetch_uri() -> String {
    "https://chromekanonymityservice.googleapis.com/v1/proxy/keys".into()
}
fn default_auction_key_sharding() -> usize {
    5
}
fn default_encryption_key_max_age_secs() -> u64 {
    14 * 24 * 60 * 60
}
fn default_key_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_key_fetch_max_response_bytes() -> usize {
    64 * 1024
}
fn default_background_refresh_interval() -> u64 {
    24 * 60 * 60
}
fn default_background_refresh_max_runtime_ms() -> u64 {
    60_000
}
fn default_fetch_in_advance_interval_ms() -> u64 {
    24 * 60 * 60 * 1000
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/ohttp-keys.redb")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Parsed coordinator allow-list, blank entries dropped.
    pub fn coordinator_allowlist(&self) -> Vec<String> {
        self.coordinator_url_allowlist
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            auction_key_fetch_uri: self.auction_key_fetch_uri.clone(),
            join_key_fetch_uri: self.join_key_fetch_uri.clone(),
            coordinator_allowlist: self.coordinator_allowlist(),
            multi_coordinator_enabled: self.multi_coordinator_enabled,
            auction_key_sharding: self.auction_key_sharding,
            purge_invalid_keys: self.purge_invalid_keys,
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            enabled: self.background_refresh_enabled,
            auction_enabled: self.background_auction_refresh_enabled,
            join_enabled: self.background_join_refresh_enabled,
            max_runtime: Duration::from_millis(self.background_refresh_max_runtime_ms),
            fetch_timeout: Duration::from_millis(self.key_fetch_timeout_ms),
            fetch_in_advance: self
                .fetch_in_advance_enabled
                .then(|| Duration::from_millis(self.fetch_in_advance_interval_ms)),
            multi_coordinator_enabled: self.multi_coordinator_enabled,
            coordinator_allowlist: self.coordinator_allowlist(),
        }
    }

    /// Settings for an embedder-built [`ObliviousHttpEncryptor`](crate::ObliviousHttpEncryptor).
    pub fn encryptor_settings(&self) -> EncryptorSettings {
        EncryptorSettings {
            media_type_change_enabled: self.media_type_change_enabled,
        }
    }

    pub fn key_max_age(&self) -> Duration {
        Duration::from_secs(self.encryption_key_max_age_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.background_refresh_interval_secs)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_uri(&self.auction_key_fetch_uri, "AUCTION_KEY_FETCH_URI")?;
        ensure_uri(&self.join_key_fetch_uri, "JOIN_KEY_FETCH_URI")?;
        for url in self.coordinator_allowlist() {
            ensure_uri(&url, "COORDINATOR_URL_ALLOWLIST")?;
        }
        if self.multi_coordinator_enabled && self.coordinator_allowlist().is_empty() {
            anyhow::bail!("COORDINATOR_URL_ALLOWLIST must not be empty when MULTI_COORDINATOR_ENABLED is set");
        }
        if self.auction_key_sharding == 0 {
            anyhow::bail!("AUCTION_KEY_SHARDING must be > 0");
        }
        if self.encryption_key_max_age_secs == 0 {
            anyhow::bail!("ENCRYPTION_KEY_MAX_AGE_SECS must be > 0");
        }
        if self.key_fetch_timeout_ms == 0 {
            anyhow::bail!("KEY_FETCH_TIMEOUT_MS must be > 0");
        }
        if self.background_refresh_interval_secs == 0 {
            anyhow::bail!("BACKGROUND_REFRESH_INTERVAL_SECS must be > 0");
        }
        // Keys fetched in advance must outlive the window they are pruned against.
        if self.fetch_in_advance_enabled
            && self.fetch_in_advance_interval_ms >= self.encryption_key_max_age_secs * 1000
        {
            anyhow::bail!(
                "FETCH_IN_ADVANCE_INTERVAL_MS must be shorter than ENCRYPTION_KEY_MAX_AGE_SECS"
            );
        }
        Ok(())
    }
}

fn ensure_uri(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    let uri: hyper::Uri = value
        .parse()
        .with_context(|| format!("{name} contains an invalid URI: {value}"))?;
    if uri.host().is_none() {
        anyhow::bail!("{name} entry {value} has no host");
    }
    Ok(())
}
