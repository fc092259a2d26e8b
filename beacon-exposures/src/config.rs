//! Configuration for the exposure pipeline and its collector.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of events held by the buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default number of entries in the dedup cache.
pub const DEFAULT_DEDUP_CACHE_CAPACITY: usize = 1000;

/// Environment variables layered over file configuration.
pub const ENV_ENV: &str = "BEACON_ENV";
pub const ENV_SERVICE: &str = "BEACON_SERVICE";
pub const ENV_VERSION: &str = "BEACON_VERSION";
pub const ENV_TAGS: &str = "BEACON_TAGS";
pub const ENV_AGENT_URL: &str = "BEACON_AGENT_URL";

/// Configuration for the exposure pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Whether the background flush loop may run.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of events held between flushes.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Buffer length at which `enqueue` flushes immediately.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Number of (flag, subject) pairs remembered for deduplication.
    #[serde(default = "default_dedup_cache_capacity")]
    pub dedup_cache_capacity: usize,

    /// Interval between background flushes.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Budget for the final flush on shutdown.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Where batches are delivered.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Static delivery context attached to every batch.
    #[serde(default)]
    pub settings: DeliverySettings,
}

fn default_enabled() -> bool {
    true
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_flush_threshold() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_dedup_cache_capacity() -> usize {
    DEFAULT_DEDUP_CACHE_CAPACITY
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            buffer_capacity: default_buffer_capacity(),
            flush_threshold: default_flush_threshold(),
            dedup_cache_capacity: default_dedup_cache_capacity(),
            flush_interval: default_flush_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            collector: CollectorConfig::default(),
            settings: DeliverySettings::default(),
        }
    }
}

impl ExposureConfig {
    /// Parse a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_dedup_cache_capacity(mut self, capacity: usize) -> Self {
        self.dedup_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: DeliverySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_capacity must be > 0".into()));
        }
        if self.flush_threshold == 0 {
            return Err(ConfigError::Invalid("flush_threshold must be > 0".into()));
        }
        if self.flush_threshold > self.buffer_capacity {
            return Err(ConfigError::Invalid(format!(
                "flush_threshold ({}) must not exceed buffer_capacity ({})",
                self.flush_threshold, self.buffer_capacity
            )));
        }
        if self.dedup_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dedup_cache_capacity must be > 0".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid("flush_interval must be > 0".into()));
        }
        self.collector.endpoint()?;
        Ok(())
    }

    /// Layer environment overrides over file values.
    ///
    /// `lookup` is usually `|name| std::env::var(name).ok()`.
    #[must_use]
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(env) = non_empty(ENV_ENV) {
            self.settings.env = Some(env);
        }
        if let Some(service) = non_empty(ENV_SERVICE) {
            self.settings.service = Some(service);
        }
        if let Some(version) = non_empty(ENV_VERSION) {
            self.settings.version = Some(version);
        }
        if let Some(tags) = non_empty(ENV_TAGS) {
            self.settings.tags.extend(parse_tags(&tags));
        }
        if let Some(url) = non_empty(ENV_AGENT_URL) {
            self.collector.agent_url = url;
        }
        self
    }
}

/// Where and how batches are delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Base URL of the local agent.
    #[serde(default = "default_agent_url")]
    pub agent_url: String,

    /// Path of the exposure intake on the agent.
    #[serde(default = "default_path")]
    pub path: String,

    /// Intake subdomain the agent proxies to.
    #[serde(default = "default_subdomain")]
    pub subdomain: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_agent_url() -> String {
    "http://localhost:8126".to_string()
}

fn default_path() -> String {
    "/evp_proxy/v2/api/v2/exposures".to_string()
}

fn default_subdomain() -> String {
    "event-platform-intake".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            agent_url: default_agent_url(),
            path: default_path(),
            subdomain: default_subdomain(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl CollectorConfig {
    /// Full intake URL: the agent URL joined with the intake path.
    pub fn endpoint(&self) -> Result<url::Url, ConfigError> {
        let base = url::Url::parse(&self.agent_url)
            .map_err(|e| ConfigError::Invalid(format!("agent_url {:?}: {e}", self.agent_url)))?;
        base.join(&self.path)
            .map_err(|e| ConfigError::Invalid(format!("path {:?}: {e}", self.path)))
    }
}

/// Deployment context attached to each batch.
///
/// Each field is resolved from its direct value first, then from the tag of
/// the same name, and omitted when neither is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// A context field resolvable from [`DeliverySettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Env,
    Service,
    Version,
}

impl SettingsField {
    /// Tag name consulted when the direct value is absent.
    #[must_use]
    pub fn tag_name(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Service => "service",
            Self::Version => "version",
        }
    }
}

impl DeliverySettings {
    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Resolve a field: direct value, then tag, else `None`. Blank values count as absent.
    #[must_use]
    pub fn resolve(&self, field: SettingsField) -> Option<String> {
        let direct = match field {
            SettingsField::Env => self.env.as_deref(),
            SettingsField::Service => self.service.as_deref(),
            SettingsField::Version => self.version.as_deref(),
        };

        direct
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.tags
                    .get(field.tag_name())
                    .map(String::as_str)
                    .filter(|v| !v.is_empty())
            })
            .map(str::to_owned)
    }
}

/// Parse `key:value` pairs separated by commas. Entries without a key are skipped.
#[must_use]
pub fn parse_tags(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.trim().split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn config_default_values() {
        let config = ExposureConfig::default();

        assert!(config.enabled);
        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.flush_threshold, 1000);
        assert_eq!(config.dedup_cache_capacity, 1000);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.collector.agent_url, "http://localhost:8126");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder_pattern() {
        let config = ExposureConfig::default()
            .with_buffer_capacity(10)
            .with_flush_threshold(5)
            .with_dedup_cache_capacity(20)
            .with_flush_interval(Duration::from_millis(250))
            .with_enabled(false);

        assert_eq!(config.buffer_capacity, 10);
        assert_eq!(config.flush_threshold, 5);
        assert_eq!(config.dedup_cache_capacity, 20);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert!(!config.enabled);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ExposureConfig::from_toml_str(
            r#"
            buffer_capacity = 50
            flush_interval = "10s"

            [settings]
            service = "checkout"

            [settings.tags]
            env = "staging"
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer_capacity, 50);
        assert_eq!(config.flush_threshold, 1000);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.settings.service.as_deref(), Some("checkout"));
        assert_eq!(
            config.settings.resolve(SettingsField::Env).as_deref(),
            Some("staging")
        );
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exposures.toml");
        std::fs::write(&path, "buffer_capacity = 0\n").unwrap();

        let err = ExposureConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        std::fs::write(&path, "buffer_capacity = 3\nflush_threshold = 3\n").unwrap();
        assert_eq!(ExposureConfig::load(&path).unwrap().buffer_capacity, 3);
    }

    #[test]
    fn validate_rejects_threshold_above_capacity() {
        let config = ExposureConfig::default()
            .with_buffer_capacity(10)
            .with_flush_threshold(20);

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("flush_threshold")));

        assert!(config.with_flush_threshold(10).validate().is_ok());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExposureConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn validate_rejects_bad_agent_url() {
        let mut config = ExposureConfig::default();
        config.collector.agent_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_joins_agent_url_and_path() {
        let collector = CollectorConfig {
            agent_url: "http://agent:8126".into(),
            ..CollectorConfig::default()
        };
        assert_eq!(
            collector.endpoint().unwrap().as_str(),
            "http://agent:8126/evp_proxy/v2/api/v2/exposures"
        );
    }

    #[test]
    fn resolve_prefers_direct_value_over_tag() {
        let settings = DeliverySettings::default()
            .with_env("prod")
            .with_tag("env", "staging")
            .with_tag("version", "1.2.3");

        assert_eq!(settings.resolve(SettingsField::Env).as_deref(), Some("prod"));
        assert_eq!(
            settings.resolve(SettingsField::Version).as_deref(),
            Some("1.2.3")
        );
        assert_eq!(settings.resolve(SettingsField::Service), None);
    }

    #[test]
    fn resolve_treats_blank_direct_value_as_absent() {
        let settings = DeliverySettings::default()
            .with_service("")
            .with_tag("service", "api");
        assert_eq!(
            settings.resolve(SettingsField::Service).as_deref(),
            Some("api")
        );
    }

    #[test]
    fn parse_tags_skips_malformed_entries() {
        let tags = parse_tags("env:prod, team : flags ,broken,:nokey,region:");

        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(tags.get("team").map(String::as_str), Some("flags"));
        assert_eq!(tags.get("region").map(String::as_str), Some(""));
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn env_overrides_layer_over_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_SERVICE, "billing"),
            (ENV_TAGS, "env:qa,team:growth"),
            (ENV_AGENT_URL, "http://10.0.0.1:8126"),
            (ENV_VERSION, "  "),
        ]);
        let config = ExposureConfig::default()
            .with_settings(DeliverySettings::default().with_service("file").with_version("1"))
            .apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.settings.service.as_deref(), Some("billing"));
        assert_eq!(config.settings.version.as_deref(), Some("1"));
        assert_eq!(
            config.settings.resolve(SettingsField::Env).as_deref(),
            Some("qa")
        );
        assert_eq!(config.collector.agent_url, "http://10.0.0.1:8126");
    }
}
