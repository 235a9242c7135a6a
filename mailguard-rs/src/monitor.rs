//! Backend availability monitoring
//!
//! Checks the backend health endpoint at startup and then on a fixed
//! interval. Failures only flip the state to disconnected; they are retried
//! on the next tick without backoff.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::backend::AnalysisBackend;

/// Availability of the analysis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    /// Last health check succeeded
    Connected,
    /// Last health check failed
    Disconnected,
    /// Never checked
    Unknown,
}

/// Process-wide availability state
pub struct AvailabilityMonitor {
    backend: Arc<dyn AnalysisBackend>,
    status: watch::Sender<BackendStatus>,
    interval: Duration,
}

impl AvailabilityMonitor {
    pub fn new(backend: Arc<dyn AnalysisBackend>, interval: Duration) -> Self {
        let (status, _) = watch::channel(BackendStatus::Unknown);
        Self {
            backend,
            status,
            interval,
        }
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.borrow()
    }

    /// Analysis is only allowed after a successful health check
    pub fn is_connected(&self) -> bool {
        self.status() == BackendStatus::Connected
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<BackendStatus> {
        self.status.subscribe()
    }

    /// Force a status, bypassing the health check
    pub fn set_status(&self, status: BackendStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    /// Check the backend once and record the outcome
    pub async fn check_now(&self) -> bool {
        let connected = match self.backend.check_health().await {
            Ok(body) => {
                debug!("Backend health: {}", body);
                true
            }
            Err(e) => {
                warn!("Backend health check failed: {}", e);
                false
            }
        };

        let previous = self.status();
        let next = if connected {
            BackendStatus::Connected
        } else {
            BackendStatus::Disconnected
        };

        if previous != next {
            match next {
                BackendStatus::Connected => info!("Backend CONNECTED"),
                _ => error!("Backend NOT CONNECTED - analysis disabled"),
            }
        }

        self.set_status(next);
        connected
    }

    /// Start the periodic health check; the first one runs immediately
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.interval;

        tokio::spawn(async move {
            info!("Starting backend health checks every {:?}", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.check_now().await;
            }
        })
    }
}
