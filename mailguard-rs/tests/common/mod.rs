//! Shared helpers: an in-process analysis backend and guard wiring

#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mailguard_rs::backend::{AnalysisBackend, HttpBackend};
use mailguard_rs::config::GuardConfig;
use mailguard_rs::dispatcher::DispatchOutcome;
use mailguard_rs::monitor::BackendStatus;
use mailguard_rs::runtime::{DispatchReport, GuardRuntime, RuntimeHandle};
use mailguard_rs::settings::Settings;
use mailguard_rs::store::{KeyValueStore, MemoryStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Thread view with a subject, a sender and two wrapped links to the same target
pub const THREAD_PAGE: &str = r##"<html><body>
<div role="main">
  <h2 data-thread-subject="">Invoice Due</h2>
  <div data-message-id="msg-1">
    <span email="billing@vendor.example">Billing</span>
    <div class="a3s">
      <p>Your invoice is attached.</p>
      <a href="https://www.google.com/url?q=https%3A%2F%2Fpay.vendor.example%2Finvoice&amp;sa=D">Pay now</a>
      <a href="https://pay.vendor.example/invoice">pay.vendor.example</a>
      <a href="https://docs.vendor.example/terms">Terms</a>
      <a href="#reply">Reply</a>
    </div>
  </div>
</div>
</body></html>"##;

/// Second message, shown after navigating away from the first
pub const OTHER_PAGE: &str = r#"<html><body>
<div role="main">
  <h2 data-thread-subject="">Lunch on Friday?</h2>
  <div data-message-id="msg-2">
    <span email="alice@example.com">Alice</span>
    <div class="a3s">Same place as last week.</div>
  </div>
</div>
</body></html>"#;

#[derive(Clone)]
struct BackendState {
    verdict: Arc<Mutex<Value>>,
    requests: Arc<Mutex<Vec<Value>>>,
    analyze_calls: Arc<AtomicUsize>,
    health_calls: Arc<AtomicUsize>,
    slow_delay: Duration,
}

/// Analysis backend served by axum on an ephemeral port
///
/// Routes, all relative to the same origin:
/// - `GET /health`
/// - `POST /analyze_email` answers with the configured verdict
/// - `POST /slow/analyze_email` answers after `slow_delay`
/// - `POST /failing/analyze_email` answers 500
/// - `POST /garbage/analyze_email` answers 200 with a body that is not a verdict
pub struct FakeBackend {
    pub addr: SocketAddr,
    state: BackendState,
    server: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::from_secs(2)).await
    }

    pub async fn start_with_delay(slow_delay: Duration) -> Self {
        let state = BackendState {
            verdict: Arc::new(Mutex::new(safe_verdict(92))),
            requests: Arc::new(Mutex::new(Vec::new())),
            analyze_calls: Arc::new(AtomicUsize::new(0)),
            health_calls: Arc::new(AtomicUsize::new(0)),
            slow_delay,
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/analyze_email", post(analyze))
            .route("/slow/analyze_email", post(slow_analyze))
            .route("/failing/analyze_email", post(failing_analyze))
            .route("/garbage/analyze_email", post(garbage_analyze))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    /// Analyze endpoint under `prefix` ("" for the normal route)
    pub fn endpoint(&self, prefix: &str) -> String {
        format!("http://{}{}/analyze_email", self.addr, prefix)
    }

    pub fn set_verdict(&self, verdict: Value) {
        *self.state.verdict.lock().unwrap() = verdict;
    }

    pub fn analyze_calls(&self) -> usize {
        self.state.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.state.health_calls.load(Ordering::SeqCst)
    }

    /// Bodies received by the analyze routes, oldest first
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn health(State(state): State<BackendState>) -> Json<Value> {
    state.health_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({"status": "healthy", "model_loaded": true}))
}

fn record(state: &BackendState, body: Value) {
    state.analyze_calls.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(body);
}

async fn analyze(State(state): State<BackendState>, Json(body): Json<Value>) -> Json<Value> {
    record(&state, body);
    let verdict = state.verdict.lock().unwrap().clone();
    Json(verdict)
}

async fn slow_analyze(State(state): State<BackendState>, Json(body): Json<Value>) -> Json<Value> {
    record(&state, body);
    tokio::time::sleep(state.slow_delay).await;
    let verdict = state.verdict.lock().unwrap().clone();
    Json(verdict)
}

async fn failing_analyze(
    State(state): State<BackendState>,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    record(&state, body);
    (StatusCode::INTERNAL_SERVER_ERROR, "model crashed")
}

async fn garbage_analyze(State(state): State<BackendState>, Json(body): Json<Value>) -> Json<Value> {
    record(&state, body);
    Json(json!({"score": "high", "verdict": null}))
}

pub fn safe_verdict(trust: u32) -> Value {
    json!({
        "email": {"trust_percent": trust, "risk_level": "safe"},
        "links": []
    })
}

/// Verdict flagging the invoice link
pub fn phishing_verdict() -> Value {
    json!({
        "email": {
            "trust_percent": 8,
            "risk_level": "dangerous",
            "explanation": "Payment request from a look-alike domain",
            "flags": ["urgent payment", "look-alike domain"]
        },
        "links": [
            {
                "href": "https://pay.vendor.example/invoice",
                "trust_percent": 4,
                "risk_level": "dangerous",
                "explanation": "Credential harvesting page",
                "flags": ["new domain"]
            },
            {
                "href": "https://docs.vendor.example/terms",
                "trust_percent": 88,
                "risk_level": "safe"
            }
        ]
    })
}

/// An address nothing listens on
pub async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/analyze_email", addr)
}

/// Guard configuration with short timers
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::development();
    config.backend.health_interval_secs = 1;
    config.backend.health_timeout_ms = 500;
    config.backend.analyze_timeout_ms = 500;
    config.detector.settle_delay_ms = 10;
    config.detector.poll_interval_ms = 50;
    config
}

pub fn settings_for(endpoint: &str) -> Settings {
    Settings {
        api_endpoint: endpoint.to_string(),
        ..Settings::default()
    }
}

pub fn http_backend(config: &GuardConfig, endpoint: &str) -> Arc<dyn AnalysisBackend> {
    Arc::new(HttpBackend::from_settings(&settings_for(endpoint), &config.backend).unwrap())
}

/// Start a guard against `endpoint` with a fresh in-memory store
pub fn start_guard(endpoint: &str) -> RuntimeHandle {
    start_guard_with(test_config(), endpoint, Arc::new(MemoryStore::new()))
}

pub fn start_guard_with(
    config: GuardConfig,
    endpoint: &str,
    store: Arc<dyn KeyValueStore>,
) -> RuntimeHandle {
    let backend = http_backend(&config, endpoint);
    GuardRuntime::new(config, settings_for(endpoint), backend, store)
        .start()
        .unwrap()
}

pub async fn wait_status(handle: &RuntimeHandle, expected: BackendStatus) {
    let mut status = handle.monitor().subscribe();
    tokio::time::timeout(Duration::from_secs(3), status.wait_for(|s| *s == expected))
        .await
        .expect("backend status did not change in time")
        .unwrap();
    // Let the reconnect observation drain before the test drives the page
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Next report with the given outcome, skipping others
pub async fn wait_outcome(
    reports: &mut broadcast::Receiver<DispatchReport>,
    outcome: DispatchOutcome,
) -> DispatchReport {
    loop {
        let report = tokio::time::timeout(Duration::from_secs(3), reports.recv())
            .await
            .expect("no dispatch report in time")
            .unwrap();
        if report.outcome == outcome {
            return report;
        }
    }
}

pub async fn rendered(handle: &RuntimeHandle) -> String {
    handle.host().rendered_html().await.unwrap().unwrap()
}
