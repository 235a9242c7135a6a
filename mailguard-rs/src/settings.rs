//! User settings persisted in the key/value store
//!
//! Each setting is stored under its own key, matching the keys the settings
//! popup writes: `apiEndpoint`, `autoAnalyze`, `showNotifications`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{GuardError, Result};
use crate::store::KeyValueStore;

pub const API_ENDPOINT_KEY: &str = "apiEndpoint";
pub const AUTO_ANALYZE_KEY: &str = "autoAnalyze";
pub const SHOW_NOTIFICATIONS_KEY: &str = "showNotifications";

pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:8000/analyze_email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Full URL of the analyze endpoint
    pub api_endpoint: String,
    /// Analyze emails as soon as they are opened
    pub auto_analyze: bool,
    pub show_notifications: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            auto_analyze: true,
            show_notifications: true,
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults for missing or mistyped keys
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let defaults = Self::default();

        let api_endpoint = match store.get(API_ENDPOINT_KEY)? {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => defaults.api_endpoint,
        };

        // Only an explicit `false` disables a flag
        let auto_analyze = !matches!(store.get(AUTO_ANALYZE_KEY)?, Some(Value::Bool(false)));
        let show_notifications =
            !matches!(store.get(SHOW_NOTIFICATIONS_KEY)?, Some(Value::Bool(false)));

        Ok(Self {
            api_endpoint,
            auto_analyze,
            show_notifications,
        })
    }

    /// Write all three keys
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        self.validate()?;
        store.set(API_ENDPOINT_KEY, Value::String(self.api_endpoint.clone()))?;
        store.set(AUTO_ANALYZE_KEY, Value::Bool(self.auto_analyze))?;
        store.set(SHOW_NOTIFICATIONS_KEY, Value::Bool(self.show_notifications))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint_url().map(|_| ())
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.api_endpoint).map_err(|e| {
            GuardError::Config(format!("Invalid API endpoint '{}': {}", self.api_endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(GuardError::Config(format!(
                "API endpoint must be http(s): {}",
                self.api_endpoint
            )));
        }

        Ok(url)
    }

    /// Health check URL on the same origin as the analyze endpoint
    pub fn health_url(&self, health_path: &str) -> Result<Url> {
        self.endpoint_url()?
            .join(health_path)
            .map_err(|e| GuardError::Config(format!("Invalid health path '{}': {}", health_path, e)))
    }
}
