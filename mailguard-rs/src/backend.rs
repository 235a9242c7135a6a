//! Analysis backend client
//!
//! The scoring itself happens in an external service. This module only
//! speaks its HTTP contract: `GET /health` and `POST /analyze_email`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::BackendConfig;
use crate::error::{GuardError, Result};
use crate::models::{AnalysisResult, ExtractedEmail, LinkRef};
use crate::settings::Settings;

/// Analysis backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Query the health endpoint; returns the response body
    async fn check_health(&self) -> Result<serde_json::Value>;

    /// Submit an email for analysis
    async fn analyze(&self, email: &ExtractedEmail) -> Result<AnalysisResult>;
}

/// Fixed email used to test the analyze endpoint end to end
pub fn sample_email() -> ExtractedEmail {
    ExtractedEmail {
        sender: "test@example.com".to_string(),
        subject: "Test Email".to_string(),
        body_text: "This is a test email to check the API connection.".to_string(),
        body_html: "<p>This is a test email to check the API connection.</p>".to_string(),
        links: vec![LinkRef {
            href: "https://example.com".to_string(),
            text: "Example".to_string(),
        }],
    }
}

/// HTTP implementation of [`AnalysisBackend`]
pub struct HttpBackend {
    client: reqwest::Client,
    analyze_url: Url,
    health_url: Url,
    analyze_timeout: Duration,
    health_timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        analyze_url: Url,
        health_url: Url,
        analyze_timeout: Duration,
        health_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mailguard-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GuardError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            analyze_url,
            health_url,
            analyze_timeout,
            health_timeout,
        })
    }

    /// Build a client for the endpoint stored in the user settings
    pub fn from_settings(settings: &Settings, config: &BackendConfig) -> Result<Self> {
        Self::new(
            settings.endpoint_url()?,
            settings.health_url(&config.health_path)?,
            config.analyze_timeout(),
            config.health_timeout(),
        )
    }

    pub fn analyze_url(&self) -> &Url {
        &self.analyze_url
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    /// Run the sample email through the analyze endpoint
    pub async fn test_analysis(&self) -> Result<AnalysisResult> {
        self.analyze(&sample_email()).await
    }

    fn transport_error(err: reqwest::Error, timeout: Duration) -> GuardError {
        if err.is_timeout() {
            GuardError::Timeout(timeout)
        } else {
            GuardError::BackendUnreachable(err.to_string())
        }
    }

    async fn status_error(response: reqwest::Response) -> GuardError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            body
        };
        GuardError::BackendStatus {
            status: status.as_u16(),
            reason,
        }
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn check_health(&self) -> Result<serde_json::Value> {
        debug!("Health check: {}", self.health_url);

        let response = self
            .client
            .get(self.health_url.clone())
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(e, self.health_timeout))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(e, self.health_timeout))?;

        Ok(serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    async fn analyze(&self, email: &ExtractedEmail) -> Result<AnalysisResult> {
        debug!(
            "Analyze request to {}: subject={:?} sender={:?} body_len={} links={}",
            self.analyze_url,
            email.subject.chars().take(30).collect::<String>(),
            email.sender.chars().take(30).collect::<String>(),
            email.body_text.len(),
            email.links.len()
        );

        let response = self
            .client
            .post(self.analyze_url.clone())
            .json(email)
            .timeout(self.analyze_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(e, self.analyze_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let err = Self::status_error(response).await;
            warn!("Analyze request failed: {}", err);
            return Err(err);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(e, self.analyze_timeout))?;

        let result: AnalysisResult = serde_json::from_slice(&body)
            .map_err(|e| GuardError::MalformedResponse(e.to_string()))?;

        debug!(
            "Analyze response: trust={}% risk={} links={}",
            result.email.trust_percent,
            result.email.risk_level,
            result.links.len()
        );

        Ok(result)
    }
}
