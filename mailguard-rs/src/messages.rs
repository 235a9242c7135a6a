//! Inbound messages from other surfaces (settings popup, scripts)
//!
//! Requests look like `{"action": "...", "data": ...}` and always get a
//! response object, never an error: `{success, data?, error?,
//! backendConnected?, message?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::AnalysisBackend;
use crate::error::Result;
use crate::models::ExtractedEmail;
use crate::monitor::AvailabilityMonitor;
use crate::settings::Settings;
use crate::store::KeyValueStore;

pub const BACKEND_REQUIRED: &str =
    "Backend service is not connected. Please ensure the backend is running.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "data")]
pub enum Request {
    #[serde(rename = "analyzeEmail")]
    AnalyzeEmail(ExtractedEmail),
    #[serde(rename = "getSettings")]
    GetSettings,
    #[serde(rename = "testAPI")]
    TestApi,
    #[serde(rename = "checkBackend")]
    CheckBackend,
}

impl Request {
    /// Everything except the connectivity check needs the backend
    pub fn requires_backend(&self) -> bool {
        !matches!(self, Request::CheckBackend)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            backend_connected: Some(true),
            message: None,
        }
    }

    fn failure(error: impl Into<String>, backend_connected: bool) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            backend_connected: Some(backend_connected),
            message: None,
        }
    }
}

pub struct MessageHandler {
    monitor: Arc<AvailabilityMonitor>,
    backend: Arc<dyn AnalysisBackend>,
    store: Arc<dyn KeyValueStore>,
}

impl MessageHandler {
    pub fn new(
        monitor: Arc<AvailabilityMonitor>,
        backend: Arc<dyn AnalysisBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            monitor,
            backend,
            store,
        }
    }

    /// Handle a raw JSON message
    pub async fn handle_value(&self, raw: Value) -> Response {
        match serde_json::from_value::<Request>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("Rejected malformed message: {}", e);
                Response::failure(
                    format!("Invalid request: {}", e),
                    self.monitor.is_connected(),
                )
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let connected = self.monitor.is_connected();
        debug!("Message received: {:?}", request);

        if request.requires_backend() && !connected {
            warn!("Backend not connected - rejecting request");
            return Response::failure(BACKEND_REQUIRED, false);
        }

        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Message handling failed: {}", e);
                Response::failure(e.to_string(), self.monitor.is_connected())
            }
        }
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        match request {
            Request::AnalyzeEmail(email) => {
                let result = self.backend.analyze(&email).await?;
                Ok(Response::ok(serde_json::to_value(result)?))
            }
            Request::GetSettings => {
                let settings = Settings::load(self.store.as_ref())?;
                Ok(Response::ok(serde_json::to_value(settings)?))
            }
            Request::TestApi => {
                let health = self.backend.check_health().await?;
                Ok(Response::ok(health))
            }
            Request::CheckBackend => {
                let connected = self.monitor.is_connected();
                Ok(Response {
                    success: true,
                    data: None,
                    error: None,
                    backend_connected: Some(connected),
                    message: Some(
                        if connected {
                            "Backend is connected"
                        } else {
                            "Backend is not connected"
                        }
                        .to_string(),
                    ),
                })
            }
        }
    }
}
