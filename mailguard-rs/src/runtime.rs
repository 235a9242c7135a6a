//! Runtime wiring
//!
//! All trigger sources publish [`Observation`]s into one channel. A single
//! detector loop consumes it and spawns a dispatch task per request; the
//! loop owns those tasks and they stop with it. Around it run the
//! availability monitor, the poll fallback and a task keeping the disabled
//! banner in sync with the backend status.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use url::Url;

use crate::backend::AnalysisBackend;
use crate::cache::AnalysisCache;
use crate::config::GuardConfig;
use crate::detector::{Detector, Observation, Trigger};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::document::{BannerPurpose, Document};
use crate::error::{GuardError, Result};
use crate::extractor::EmailExtractor;
use crate::locator::LocatorProfile;
use crate::models::EmailIdentifier;
use crate::monitor::{AvailabilityMonitor, BackendStatus};
use crate::render::Renderer;
use crate::session::{Session, SharedSession};
use crate::settings::Settings;
use crate::store::KeyValueStore;

/// Result of one dispatch, broadcast to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub trigger: Trigger,
    pub identifier: Option<EmailIdentifier>,
    pub outcome: DispatchOutcome,
}

/// Everything needed to run the guard on one page
pub struct GuardRuntime {
    config: GuardConfig,
    settings: Settings,
    backend: Arc<dyn AnalysisBackend>,
    store: Arc<dyn KeyValueStore>,
}

impl GuardRuntime {
    pub fn new(
        config: GuardConfig,
        settings: Settings,
        backend: Arc<dyn AnalysisBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            settings,
            backend,
            store,
        }
    }

    /// Spawn the background tasks; must be called inside a tokio runtime
    pub fn start(self) -> Result<RuntimeHandle> {
        let profile = LocatorProfile::from_config(&self.config.locators)?;
        let renderer = Renderer::new(&profile);

        let cache = AnalysisCache::load(self.store.as_ref(), self.config.cache.capacity)?;
        let cached = cache.len();
        let session = Session::new(cache, self.store.clone()).shared();

        let monitor = Arc::new(AvailabilityMonitor::new(
            self.backend.clone(),
            self.config.backend.health_interval(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            session.clone(),
            monitor.clone(),
            self.backend.clone(),
            EmailExtractor::new(profile.clone()),
            renderer.clone(),
        ));

        let (observations, rx) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(64);

        let host = HostHandle {
            session: session.clone(),
            observations: observations.clone(),
            profile: profile.clone(),
            renderer: renderer.clone(),
            monitor: monitor.clone(),
            endpoint: self.settings.api_endpoint.clone(),
        };

        info!(
            "Starting guard: endpoint={} auto_analyze={} cache={}/{}",
            self.settings.api_endpoint,
            self.settings.auto_analyze,
            cached,
            self.config.cache.capacity
        );

        let tasks = vec![
            spawn_detector(
                rx,
                Detector::new(self.settings.auto_analyze),
                dispatcher,
                reports.clone(),
                self.config.detector.settle_delay(),
            ),
            spawn_poller(host.clone(), self.config.detector.poll_interval()),
            spawn_availability_banner(host.clone()),
            monitor.clone().spawn(),
        ];

        Ok(RuntimeHandle {
            host,
            monitor,
            reports,
            tasks,
        })
    }
}

fn spawn_detector(
    mut rx: mpsc::UnboundedReceiver<Observation>,
    mut detector: Detector,
    dispatcher: Arc<Dispatcher>,
    reports: broadcast::Sender<DispatchReport>,
    settle_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Owned by this task: aborting the detector aborts its dispatches
        let mut dispatches = JoinSet::new();

        loop {
            tokio::select! {
                observation = rx.recv() => {
                    let Some(observation) = observation else {
                        break;
                    };
                    let Some(request) = detector.observe(observation) else {
                        continue;
                    };

                    let dispatcher = dispatcher.clone();
                    let reports = reports.clone();
                    dispatches.spawn(async move {
                        if request.trigger.needs_settle_delay() {
                            tokio::time::sleep(settle_delay).await;
                        }
                        let trigger = request.trigger;
                        let identifier = request.identifier.clone();
                        let outcome = dispatcher.dispatch(request).await;

                        // Nobody listening is fine
                        let _ = reports.send(DispatchReport {
                            trigger,
                            identifier,
                            outcome,
                        });
                    });
                }
                Some(finished) = dispatches.join_next() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Dispatch task panicked: {}", e);
                        }
                    }
                }
            }
        }

        debug!("Observation channel closed, detector stopped");
        dispatches.shutdown().await;
    })
}

fn spawn_poller(host: HostHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let identifier = host.current_identifier().await;
            if host.publish(Trigger::Poll, identifier).is_err() {
                break;
            }
        }
    })
}

fn spawn_availability_banner(host: HostHandle) -> JoinHandle<()> {
    let mut status = host.monitor.subscribe();

    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            match current {
                BackendStatus::Disconnected => {
                    if let Err(e) = host.show_disabled().await {
                        error!("Failed to show disabled banner: {}", e);
                    }
                }
                BackendStatus::Connected => {
                    host.clear_disabled().await;
                    let identifier = host.current_identifier().await;
                    if host.publish(Trigger::Reconnected, identifier).is_err() {
                        break;
                    }
                }
                BackendStatus::Unknown => {}
            }
        }
    })
}

/// Page-side API: what the host reports and what it reads back
#[derive(Clone)]
pub struct HostHandle {
    session: SharedSession,
    observations: mpsc::UnboundedSender<Observation>,
    profile: LocatorProfile,
    renderer: Renderer,
    monitor: Arc<AvailabilityMonitor>,
    endpoint: String,
}

impl HostHandle {
    fn publish(&self, trigger: Trigger, identifier: Option<EmailIdentifier>) -> Result<()> {
        self.observations
            .send(Observation::new(trigger, identifier))
            .map_err(|_| GuardError::Shutdown)
    }

    /// The page content changed or a new page was loaded
    pub async fn load_document(&self, url: Url, html: impl Into<String>) -> Result<()> {
        let document = Document::new(url, html);
        let (identifier, has_container) = {
            let page = document.parse();
            (
                self.profile.identify(document.url(), &page),
                self.profile.has_container(&page),
            )
        };

        let trigger = {
            let mut session = self.session.lock().await;
            let first = session.document().is_none();
            let had_container = session
                .document()
                .is_some_and(|d| self.profile.has_container(&d.parse()));

            session.load_document(document, &self.profile);

            if self.monitor.status() == BackendStatus::Disconnected {
                if let Some(document) = session.document_mut() {
                    if document.overlay().banner(BannerPurpose::Disabled).is_none() {
                        self.renderer.show_disabled(document, &self.endpoint)?;
                    }
                }
            }

            if first {
                Trigger::Startup
            } else if has_container && !had_container {
                Trigger::ContainerReplaced
            } else {
                Trigger::Mutation
            }
        };

        debug!("Document loaded ({:?}), identifier={:?}", trigger, identifier);
        self.publish(trigger, identifier)
    }

    /// In-app navigation: the URL changed without a page load
    pub async fn navigate(&self, url: Url) -> Result<()> {
        let identifier = {
            let mut session = self.session.lock().await;
            session.set_url(url, &self.profile);
            session.current_identifier(&self.profile)
        };
        self.publish(Trigger::HashChange, identifier)
    }

    /// Click on the page; returns false if no message is open
    pub async fn click_message(&self) -> Result<bool> {
        let identifier = {
            let session = self.session.lock().await;
            let Some(document) = session.document() else {
                return Ok(false);
            };
            let page = document.parse();
            if !self.profile.has_container(&page) {
                return Ok(false);
            }
            self.profile.identify(document.url(), &page)
        };
        self.publish(Trigger::Click, identifier)?;
        Ok(true)
    }

    /// Ask for an analysis of the displayed email regardless of history
    pub async fn request_analysis(&self) -> Result<()> {
        let identifier = self.current_identifier().await;
        self.publish(Trigger::Manual, identifier)
    }

    pub async fn current_identifier(&self) -> Option<EmailIdentifier> {
        self.session.lock().await.current_identifier(&self.profile)
    }

    /// Annotated page, or `None` before any page was loaded
    pub async fn rendered_html(&self) -> Result<Option<String>> {
        let session = self.session.lock().await;
        session
            .document()
            .map(|d| d.render(self.renderer.link_selector()))
            .transpose()
    }

    /// Notified on every change of the annotated page
    pub async fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.session.lock().await.subscribe()
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    async fn show_disabled(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(document) = session.document_mut() {
            self.renderer.show_disabled(document, &self.endpoint)?;
            session.touch();
        }
        Ok(())
    }

    async fn clear_disabled(&self) {
        let mut session = self.session.lock().await;
        if let Some(document) = session.document_mut() {
            if self.renderer.clear(document, BannerPurpose::Disabled) {
                session.touch();
            }
        }
    }
}

/// Running guard; dropping it stops the background tasks
pub struct RuntimeHandle {
    host: HostHandle,
    monitor: Arc<AvailabilityMonitor>,
    reports: broadcast::Sender<DispatchReport>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn monitor(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<DispatchReport> {
        self.reports.subscribe()
    }

    /// Request a manual analysis and wait for its outcome
    pub async fn analyze_now(&self) -> Result<DispatchReport> {
        let mut reports = self.subscribe_reports();
        self.host.request_analysis().await?;

        loop {
            match reports.recv().await {
                Ok(report) if report.trigger == Trigger::Manual => return Ok(report),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} dispatch reports", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(GuardError::Shutdown),
            }
        }
    }

    pub fn shutdown(self) {
        info!("Stopping guard");
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
