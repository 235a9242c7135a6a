//! Configuration for mailguard-rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::document::validate_rewrite_selector;
use crate::error::{GuardError, Result};
use crate::locator::LocatorProfile;

/// Main guard configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GuardConfig {
    /// Analysis backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Email change detection
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Analysis cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Persistent key/value store
    #[serde(default)]
    pub storage: StorageConfig,
    /// Page locators
    #[serde(default)]
    pub locators: LocatorConfig,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend configuration
///
/// The analyze endpoint itself is a persisted user setting; this section
/// only holds transport parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Health check path on the analyze endpoint's origin
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Seconds between health checks
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    /// Health check timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub health_timeout_ms: u64,
    /// Analysis request timeout in milliseconds
    #[serde(default = "default_analyze_timeout")]
    pub analyze_timeout_ms: u64,
}

/// Detector configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// Fallback poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Delay between detecting an email and reading it, in milliseconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum number of analyses kept
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// JSON file backing the key/value store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Identifier marker: element selector plus the attribute holding the id
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MarkerConfig {
    pub selector: String,
    pub attribute: String,
}

/// Selector lists, each in priority order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocatorConfig {
    #[serde(default = "default_subject_selectors")]
    pub subject: Vec<String>,
    #[serde(default = "default_sender_selectors")]
    pub sender: Vec<String>,
    #[serde(default = "default_body_selectors")]
    pub body: Vec<String>,
    #[serde(default = "default_body_fallback_selectors")]
    pub body_fallback: Vec<String>,
    #[serde(default = "default_url_parameter")]
    pub url_parameter: Option<String>,
    #[serde(default = "default_markers")]
    pub markers: Vec<MarkerConfig>,
    #[serde(default = "default_container_selectors")]
    pub container: Vec<String>,
    #[serde(default = "default_anchor_selectors")]
    pub anchors: Vec<String>,
    #[serde(default = "default_link_selector")]
    pub links: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// One of "pretty", "compact", "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    3_000
}

fn default_analyze_timeout() -> u64 {
    10_000
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_settle_delay() -> u64 {
    500
}

fn default_cache_capacity() -> usize {
    50
}

fn default_store_path() -> PathBuf {
    std::env::var("MAILGUARD_STORE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/mailguard/store.json"))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_subject_selectors() -> Vec<String> {
    strings(&[
        "h2[data-thread-subject]",
        "h2[role=\"heading\"]",
        "span[data-thread-subject]",
        ".hP",
    ])
}

fn default_sender_selectors() -> Vec<String> {
    strings(&["span[email]", "a[href^=\"mailto:\"]", ".gD"])
}

fn default_body_selectors() -> Vec<String> {
    strings(&[
        "[data-message-id] .a3s",
        "[data-message-id] .ii.gt",
        "[data-body-id]",
        ".gs",
        ".a3s",
        ".ii.gt",
    ])
}

fn default_body_fallback_selectors() -> Vec<String> {
    strings(&["[role=\"main\"]", ".bAp"])
}

fn default_url_parameter() -> Option<String> {
    Some("messageId".to_string())
}

fn default_markers() -> Vec<MarkerConfig> {
    vec![
        MarkerConfig {
            selector: "[data-message-id]".to_string(),
            attribute: "data-message-id".to_string(),
        },
        MarkerConfig {
            selector: "[data-thread-id]".to_string(),
            attribute: "data-thread-id".to_string(),
        },
    ]
}

fn default_container_selectors() -> Vec<String> {
    strings(&["[data-message-id]"])
}

fn default_anchor_selectors() -> Vec<String> {
    strings(&["[data-message-id]", "[role=\"main\"]", ".bAp", "body"])
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            health_path: default_health_path(),
            health_interval_secs: default_health_interval(),
            health_timeout_ms: default_health_timeout(),
            analyze_timeout_ms: default_analyze_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_millis(self.analyze_timeout_ms)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl DetectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            subject: default_subject_selectors(),
            sender: default_sender_selectors(),
            body: default_body_selectors(),
            body_fallback: default_body_fallback_selectors(),
            url_parameter: default_url_parameter(),
            markers: default_markers(),
            container: default_container_selectors(),
            anchors: default_anchor_selectors(),
            links: default_link_selector(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| GuardError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Defaults with debug logging
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.backend.health_path.starts_with('/') {
            return Err(GuardError::Config(format!(
                "Health path must start with '/': {}",
                self.backend.health_path
            )));
        }

        if self.backend.health_interval_secs == 0 {
            return Err(GuardError::Config(
                "Health check interval must be at least 1 second".to_string(),
            ));
        }

        if self.backend.analyze_timeout_ms == 0 || self.backend.health_timeout_ms == 0 {
            return Err(GuardError::Config("Timeouts must be non-zero".to_string()));
        }

        if self.detector.poll_interval_ms == 0 {
            return Err(GuardError::Config("Poll interval must be non-zero".to_string()));
        }

        if self.cache.capacity == 0 {
            return Err(GuardError::Config("Cache capacity must be at least 1".to_string()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(GuardError::Config(format!(
                "Unknown log format '{}'",
                self.logging.format
            )));
        }

        if self.locators.anchors.is_empty() {
            return Err(GuardError::Config("At least one banner anchor is required".to_string()));
        }

        // Every selector must parse; anchors and links are also used for rewriting
        LocatorProfile::from_config(&self.locators)?;
        for selector in self.locators.anchors.iter().chain(Some(&self.locators.links)) {
            validate_rewrite_selector(selector)?;
        }

        Ok(())
    }
}
