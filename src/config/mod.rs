//! Configuration management.
//!
//! Configuration comes from a TOML file, then `TTLSTORE_*` environment
//! variables, then command-line flags. The core never reads configuration
//! itself: it receives the plain [`RetryPolicy`], [`TtlPolicy`] and
//! [`GcConfig`] values built here.
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/ttlstore"
//!
//! [cas]
//! max_retries = 5
//! initial_backoff_ms = 50
//! max_backoff_ms = 2000
//!
//! [ttl]
//! default_ttl_secs = 86400
//!
//! [gc]
//! batch_size = 200
//! rate_limit_per_second = 20
//! dry_run = false
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! port = 9090
//! ```

use crate::models::{GcConfig, ResourceType};
use crate::storage::{RetryPolicy, TtlPolicy};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the GC admin key.
pub const ADMIN_KEY_ENV: &str = "TTLSTORE_ADMIN_KEY";

/// Main configuration for ttlstore.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the filesystem object store.
    pub data_dir: PathBuf,
    /// CAS retry policy.
    pub retry: RetryPolicy,
    /// TTL defaults.
    pub ttl: TtlPolicy,
    /// GC defaults.
    pub gc: GcConfig,
    /// Key GC triggers must present. Triggers are refused while unset.
    pub admin_key: Option<SecretString>,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Observability section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// `[logging]` section.
    pub logging: Option<LoggingSettings>,
    /// `[metrics]` section.
    pub metrics: Option<MetricsSettings>,
}

/// Logging section in config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `ttlstore=debug`.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Log file path; stderr when unset.
    pub file: Option<String>,
}

/// Metrics section in config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether the Prometheus recorder is installed.
    pub enabled: Option<bool>,
    /// Scrape listener port.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// `[storage]` section.
    pub storage: Option<ConfigFileStorage>,
    /// `[cas]` section.
    pub cas: Option<ConfigFileCas>,
    /// `[ttl]` section.
    pub ttl: Option<ConfigFileTtl>,
    /// `[gc]` section.
    pub gc: Option<ConfigFileGc>,
    /// `[logging]` section.
    pub logging: Option<LoggingSettings>,
    /// `[metrics]` section.
    pub metrics: Option<MetricsSettings>,
}

/// Storage section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// Data directory.
    pub data_dir: Option<String>,
}

/// CAS section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCas {
    /// Total attempts per CAS operation.
    pub max_retries: Option<u32>,
    /// First backoff delay.
    pub initial_backoff_ms: Option<u64>,
    /// Backoff ceiling.
    pub max_backoff_ms: Option<u64>,
}

/// TTL section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTtl {
    /// TTL for writes that do not specify one, in place of the per-type default.
    pub default_ttl_secs: Option<i64>,
}

/// GC section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileGc {
    /// Types to sweep.
    pub resource_types: Option<Vec<String>>,
    /// Page size.
    pub batch_size: Option<usize>,
    /// Per-type cap; 0 removes the cap.
    pub max_objects_per_type: Option<usize>,
    /// Concurrent batches.
    pub max_concurrent_batches: Option<usize>,
    /// Listing-error policy.
    pub continue_on_errors: Option<bool>,
    /// Dry-run default.
    pub dry_run: Option<bool>,
    /// Advisory timeout.
    pub timeout_ms: Option<u64>,
    /// Listing calls per second.
    pub rate_limit_per_second: Option<u32>,
    /// Pause between pages.
    pub inter_batch_delay_ms: Option<u64>,
    /// Listing attempts per cursor.
    pub max_list_retries: Option<u32>,
    /// Admin key. Prefer `TTLSTORE_ADMIN_KEY`.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub admin_key: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(SecretString::from))
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ttlstore"),
            retry: RetryPolicy::default(),
            ttl: TtlPolicy::default(),
            gc: GcConfig::default(),
            admin_key: None,
            observability: ObservabilitySettings::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds an
    /// invalid value.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or holds an invalid value.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/ttlstore/` on macOS)
    /// 2. XDG config dir (`~/.config/ttlstore/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found. A file that
    /// exists but does not load is logged and skipped.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("ttlstore").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("ttlstore")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring config file");
                },
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `StoreConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.storage.and_then(|s| s.data_dir) {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(cas) = file.cas {
            if let Some(v) = cas.max_retries {
                config.retry.max_retries = v;
            }
            if let Some(v) = cas.initial_backoff_ms {
                config.retry.initial_backoff = Duration::from_millis(v);
            }
            if let Some(v) = cas.max_backoff_ms {
                config.retry.max_backoff = Duration::from_millis(v);
            }
        }
        if let Some(ttl) = file.ttl.and_then(|t| t.default_ttl_secs) {
            config.ttl = TtlPolicy::new().with_default_ttl(crate::storage::ttl::validate_ttl(ttl)?);
        }
        if let Some(gc) = file.gc {
            config.apply_gc_section(gc)?;
        }
        config.observability = ObservabilitySettings {
            logging: file.logging,
            metrics: file.metrics,
        };

        Ok(config)
    }

    fn apply_gc_section(&mut self, gc: ConfigFileGc) -> Result<()> {
        if let Some(names) = gc.resource_types {
            self.gc.resource_types = parse_resource_types(names.iter().map(String::as_str))?;
        }
        if let Some(v) = gc.batch_size {
            self.gc.batch_size = v;
        }
        if let Some(v) = gc.max_objects_per_type {
            self.gc.max_objects_per_type = (v > 0).then_some(v);
        }
        if let Some(v) = gc.max_concurrent_batches {
            self.gc.max_concurrent_batches = v;
        }
        if let Some(v) = gc.continue_on_errors {
            self.gc.continue_on_errors = v;
        }
        if let Some(v) = gc.dry_run {
            self.gc.dry_run = v;
        }
        if let Some(v) = gc.timeout_ms {
            self.gc.timeout_ms = v;
        }
        if let Some(v) = gc.rate_limit_per_second {
            self.gc.rate_limit_per_second = v;
        }
        if let Some(v) = gc.inter_batch_delay_ms {
            self.gc.inter_batch_delay_ms = v;
        }
        if let Some(v) = gc.max_list_retries {
            self.gc.max_list_retries = v;
        }
        if gc.admin_key.is_some() {
            self.admin_key = gc.admin_key;
        }
        Ok(())
    }

    /// Applies `TTLSTORE_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `TTLSTORE_DATA_DIR` | `data_dir` |
    /// | `TTLSTORE_CAS_MAX_RETRIES` | `retry.max_retries` |
    /// | `TTLSTORE_DEFAULT_TTL_SECS` | `ttl` |
    /// | `TTLSTORE_GC_BATCH_SIZE` | `gc.batch_size` |
    /// | `TTLSTORE_GC_RATE_LIMIT` | `gc.rate_limit_per_second` |
    /// | `TTLSTORE_GC_DRY_RUN` | `gc.dry_run` |
    /// | `TTLSTORE_ADMIN_KEY` | `admin_key` |
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any variable lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = get("TTLSTORE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = get("TTLSTORE_CAS_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.retry.max_retries = v;
        }
        if let Some(ttl) = get("TTLSTORE_DEFAULT_TTL_SECS")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|v| crate::storage::ttl::validate_ttl(v).ok())
        {
            self.ttl = TtlPolicy::new().with_default_ttl(ttl);
        }
        if let Some(v) = get("TTLSTORE_GC_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.gc.batch_size = v;
        }
        if let Some(v) = get("TTLSTORE_GC_RATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.gc.rate_limit_per_second = v;
        }
        if let Some(v) = get("TTLSTORE_GC_DRY_RUN").map(|v| parse_bool(&v)) {
            self.gc.dry_run = v;
        }
        if let Some(key) = get(ADMIN_KEY_ENV) {
            self.admin_key = Some(SecretString::from(key));
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }
}

/// Parses a list of resource type names.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] naming the first unknown type.
pub fn parse_resource_types<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<ResourceType>> {
    names
        .into_iter()
        .map(|name| {
            ResourceType::parse(name)
                .ok_or_else(|| Error::InvalidInput(format!("unknown resource type '{name}'")))
        })
        .collect()
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_sections_override_defaults() {
        let config = StoreConfig::from_toml(
            r#"
            [storage]
            data_dir = "/tmp/ttl"

            [cas]
            max_retries = 5
            initial_backoff_ms = 20

            [ttl]
            default_ttl_secs = 60

            [gc]
            resource_types = ["threads", "file"]
            batch_size = 10
            max_objects_per_type = 0

            [logging]
            format = "json"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.data_dir, PathBuf::from("/tmp/ttl"));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(20));
        assert_eq!(config.retry.max_backoff, RetryPolicy::default().max_backoff);
        assert_eq!(config.ttl.default_ttl_secs, Some(60));
        assert_eq!(
            config.gc.resource_types,
            vec![ResourceType::Thread, ResourceType::File]
        );
        assert_eq!(config.gc.batch_size, 10);
        assert_eq!(config.gc.max_objects_per_type, None);
        assert_eq!(
            config
                .observability
                .logging
                .and_then(|l| l.format)
                .as_deref(),
            Some("json")
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(StoreConfig::from_toml("[ttl]\ndefault_ttl_secs = -5").is_err());
        assert!(StoreConfig::from_toml("[gc]\nresource_types = [\"vector\"]").is_err());
        assert!(StoreConfig::from_toml("[gc\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TTLSTORE_DATA_DIR", "/data"),
            ("TTLSTORE_GC_DRY_RUN", "yes"),
            ("TTLSTORE_GC_BATCH_SIZE", "not-a-number"),
            ("TTLSTORE_DEFAULT_TTL_SECS", "99999999999"),
            (ADMIN_KEY_ENV, "k3y"),
        ]
        .into_iter()
        .collect();

        let config =
            StoreConfig::new().with_overrides_from(|k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert!(config.gc.dry_run);
        assert_eq!(config.gc.batch_size, GcConfig::default().batch_size);
        assert_eq!(config.ttl, TtlPolicy::default());
        assert_eq!(
            config.admin_key.as_ref().map(|k| k.expose_secret()),
            Some("k3y")
        );
    }
}
