//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;

/// Default filter when neither config nor environment sets one.
const DEFAULT_LEVEL: &str = "info";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Log file; stderr when `None`.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LEVEL.to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// `RUST_LOG` wins over `TTLSTORE_LOG_LEVEL`, which wins over the config
    /// file. `verbose` raises the crate's own level to `debug`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        Self::from_settings_with(settings, verbose, |key| std::env::var(key).ok())
    }

    fn from_settings_with(
        settings: Option<&LoggingSettings>,
        verbose: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(level) = settings.and_then(|s| s.level.clone()) {
            config.filter = level;
        }
        if let Some(format) = settings.and_then(|s| s.format.as_deref()) {
            config.format = LogFormat::parse(format);
        }
        config.file = settings.and_then(|s| s.file.as_ref()).map(PathBuf::from);

        if let Some(level) = env("TTLSTORE_LOG_LEVEL") {
            config.filter = level;
        }
        if let Some(filter) = env("RUST_LOG") {
            config.filter = filter;
        }
        if let Some(format) = env("TTLSTORE_LOG_FORMAT") {
            config.format = LogFormat::parse(&format);
        }
        if let Some(file) = env("TTLSTORE_LOG_FILE") {
            config.file = Some(PathBuf::from(file));
        }
        if verbose {
            config.filter = format!("{},ttlstore=debug", config.filter);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_settings() {
        let settings = LoggingSettings {
            level: Some("warn".to_string()),
            format: Some("json".to_string()),
            file: None,
        };
        let config = LoggingConfig::from_settings_with(Some(&settings), false, |key| {
            (key == "TTLSTORE_LOG_LEVEL").then(|| "error".to_string())
        });
        assert_eq!(config.filter, "error");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_verbose_adds_crate_debug() {
        let config = LoggingConfig::from_settings_with(None, true, |_| None);
        assert_eq!(config.filter, "info,ttlstore=debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }
}
