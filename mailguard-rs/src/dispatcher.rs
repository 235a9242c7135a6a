//! Analysis dispatch
//!
//! One dispatch walks `checking cache -> (hit: render) | (miss: loading ->
//! awaiting backend -> cache + render | render error)`. It is refused up
//! front while the backend is unavailable, and its result is not painted if
//! the user has moved to another email by the time it arrives.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::AnalysisBackend;
use crate::detector::DispatchRequest;
use crate::document::BannerPurpose;
use crate::error::Result;
use crate::extractor::EmailExtractor;
use crate::models::{AnalysisResult, EmailIdentifier, ExtractedEmail};
use crate::monitor::AvailabilityMonitor;
use crate::render::{Renderer, ANALYSIS_FAILED};
use crate::session::{Session, SharedSession};

/// How a dispatch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Backend not connected; nothing extracted, nothing shown
    Unavailable,
    /// No page loaded
    NoDocument,
    /// Rendered from the cache without a backend call
    CacheHit,
    /// Page had neither subject nor sender
    Abandoned,
    /// Backend result cached and rendered
    Rendered,
    /// Backend call failed; error banner shown
    ErrorShown,
    /// Displayed email changed; nothing rendered
    Stale,
    /// Internal error; UI left as it was
    Failed,
}

/// Work left after the first locked phase
enum Prepared {
    Done(DispatchOutcome),
    /// Identifier, extracted email and the loading ticket
    Analyze(Option<EmailIdentifier>, ExtractedEmail, u64),
}

pub struct Dispatcher {
    session: SharedSession,
    monitor: Arc<AvailabilityMonitor>,
    backend: Arc<dyn AnalysisBackend>,
    extractor: EmailExtractor,
    renderer: Renderer,
}

impl Dispatcher {
    pub fn new(
        session: SharedSession,
        monitor: Arc<AvailabilityMonitor>,
        backend: Arc<dyn AnalysisBackend>,
        extractor: EmailExtractor,
        renderer: Renderer,
    ) -> Self {
        Self {
            session,
            monitor,
            backend,
            extractor,
            renderer,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Run one dispatch; never returns an error
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        match self.run(&request).await {
            Ok(outcome) => {
                info!(
                    "Dispatch {:?} for {}: {:?}",
                    request.trigger,
                    describe(request.identifier.as_ref()),
                    outcome
                );
                outcome
            }
            Err(e) => {
                error!(
                    "Dispatch {:?} for {} failed: {}",
                    request.trigger,
                    describe(request.identifier.as_ref()),
                    e
                );
                DispatchOutcome::Failed
            }
        }
    }

    async fn run(&self, request: &DispatchRequest) -> Result<DispatchOutcome> {
        if !self.monitor.is_connected() {
            warn!("Backend not connected - analysis disabled");
            return Ok(DispatchOutcome::Unavailable);
        }

        let (id, email, ticket) = match self.prepare(request).await? {
            Prepared::Done(outcome) => return Ok(outcome),
            Prepared::Analyze(id, email, ticket) => (id, email, ticket),
        };

        let response = self.backend.analyze(&email).await;
        self.complete(id, ticket, response).await
    }

    /// Cache lookup and extraction, under the session lock
    async fn prepare(&self, request: &DispatchRequest) -> Result<Prepared> {
        let profile = self.extractor.profile();
        let mut session = self.session.lock().await;

        let Some(document) = session.document() else {
            return Ok(Prepared::Done(DispatchOutcome::NoDocument));
        };

        let page = document.parse();
        let current = profile.identify(document.url(), &page);
        if request.identifier.is_some() && request.identifier != current {
            debug!(
                "Displayed email is now {}, dropping dispatch",
                describe(current.as_ref())
            );
            return Ok(Prepared::Done(DispatchOutcome::Stale));
        }

        if let Some(id) = &current {
            if let Some(cached) = session.cached(id) {
                debug!("Using cached analysis for {}", id);
                drop(page);
                self.paint(&mut session, &cached)?;
                return Ok(Prepared::Done(DispatchOutcome::CacheHit));
            }
        }

        let email = self.extractor.extract(&page);
        drop(page);

        if !email.is_analyzable() {
            debug!("No subject or sender found, abandoning");
            return Ok(Prepared::Done(DispatchOutcome::Abandoned));
        }

        if let Some(document) = session.document_mut() {
            self.renderer.show_loading(document)?;
        }
        let ticket = session.begin_loading();
        session.touch();

        Ok(Prepared::Analyze(current, email, ticket))
    }

    /// Cache the backend answer and paint it if the email is still displayed
    async fn complete(
        &self,
        id: Option<EmailIdentifier>,
        ticket: u64,
        response: Result<AnalysisResult>,
    ) -> Result<DispatchOutcome> {
        let mut session = self.session.lock().await;
        let owns_loading = session.end_loading(ticket);

        if let (Some(id), Ok(result)) = (&id, &response) {
            session.cache_result(id.clone(), result.clone());
        }

        let current = session.current_identifier(self.extractor.profile());
        if current != id {
            debug!(
                "Analysis for {} arrived after switching to {}",
                describe(id.as_ref()),
                describe(current.as_ref())
            );
            // A later dispatch may have put up its own loading banner
            if owns_loading {
                if let Some(document) = session.document_mut() {
                    if self.renderer.clear(document, BannerPurpose::Loading) {
                        session.touch();
                    }
                }
            }
            return Ok(DispatchOutcome::Stale);
        }

        match response {
            Ok(result) => {
                self.paint(&mut session, &result)?;
                Ok(DispatchOutcome::Rendered)
            }
            Err(e) => {
                if e.is_unavailable() {
                    warn!("Backend unavailable for {}: {}", describe(id.as_ref()), e);
                } else {
                    error!("Analysis failed for {}: {}", describe(id.as_ref()), e);
                }
                let Some(document) = session.document_mut() else {
                    return Ok(DispatchOutcome::NoDocument);
                };
                self.renderer.show_error(document, ANALYSIS_FAILED)?;
                session.touch();
                Ok(DispatchOutcome::ErrorShown)
            }
        }
    }

    fn paint(&self, session: &mut Session, result: &AnalysisResult) -> Result<()> {
        if let Some(document) = session.document_mut() {
            self.renderer.show_result(document, result)?;
        }
        session.touch();
        Ok(())
    }
}

fn describe(id: Option<&EmailIdentifier>) -> String {
    id.map_or_else(|| "<unknown>".to_string(), |id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAnalysisBackend;
    use crate::cache::AnalysisCache;
    use crate::detector::Trigger;
    use crate::document::Document;
    use crate::error::GuardError;
    use crate::locator::LocatorProfile;
    use crate::models::{Assessment, RiskLevel};
    use crate::monitor::BackendStatus;
    use crate::store::MemoryStore;
    use std::time::Duration;
    use url::Url;

    const INVOICE: &str = r#"<html><body><div role="main"><h2 data-thread-subject="">Invoice Due</h2><div data-message-id="msg-1"><div class="a3s">Pay within 24 hours.</div></div></div></body></html>"#;

    fn safe(trust: u32) -> AnalysisResult {
        AnalysisResult {
            email: Assessment {
                trust_percent: trust,
                risk_level: RiskLevel::Safe,
                explanation: None,
                flags: vec![],
                phishing_prob: None,
            },
            links: vec![],
            overall_risk_level: None,
        }
    }

    /// Answers after a delay, long enough to change the page meanwhile
    struct SlowBackend {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl AnalysisBackend for SlowBackend {
        async fn check_health(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"status": "healthy"}))
        }

        async fn analyze(&self, _email: &ExtractedEmail) -> Result<AnalysisResult> {
            tokio::time::sleep(self.delay).await;
            Ok(safe(92))
        }
    }

    fn inbox(html: &str) -> Document {
        Document::new(Url::parse("https://mail.google.com/mail/u/0/#inbox").unwrap(), html)
    }

    fn request(id: &str) -> DispatchRequest {
        DispatchRequest {
            trigger: Trigger::Mutation,
            identifier: EmailIdentifier::new(id),
        }
    }

    async fn setup(
        backend: impl AnalysisBackend + 'static,
        status: BackendStatus,
        html: Option<&str>,
    ) -> (Dispatcher, SharedSession) {
        let backend: Arc<dyn AnalysisBackend> = Arc::new(backend);
        let monitor = Arc::new(AvailabilityMonitor::new(backend.clone(), Duration::from_secs(10)));
        monitor.set_status(status);

        let session = Session::new(AnalysisCache::new(50), Arc::new(MemoryStore::new())).shared();
        let profile = LocatorProfile::gmail().unwrap();
        if let Some(html) = html {
            session.lock().await.load_document(inbox(html), &profile);
        }

        let dispatcher = Dispatcher::new(
            session.clone(),
            monitor,
            backend,
            EmailExtractor::new(profile.clone()),
            Renderer::new(&profile),
        );
        (dispatcher, session)
    }

    #[tokio::test]
    async fn test_disconnected_does_nothing() {
        let mut backend = MockAnalysisBackend::new();
        backend.expect_analyze().never();
        let (dispatcher, session) = setup(backend, BackendStatus::Disconnected, Some(INVOICE)).await;

        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::Unavailable);
        let session = session.lock().await;
        assert!(session.document().unwrap().overlay().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_status_counts_as_disconnected() {
        let mut backend = MockAnalysisBackend::new();
        backend.expect_analyze().never();
        let (dispatcher, _) = setup(backend, BackendStatus::Unknown, Some(INVOICE)).await;
        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let mut backend = MockAnalysisBackend::new();
        backend
            .expect_analyze()
            .times(1)
            .withf(|email| email.subject == "Invoice Due" && email.sender.is_empty())
            .returning(|_| Ok(safe(92)));
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(INVOICE)).await;

        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::Rendered);
        {
            let session = session.lock().await;
            let overlay = session.document().unwrap().overlay();
            assert!(overlay.banner(BannerPurpose::Loading).is_none());
            assert!(overlay.banner(BannerPurpose::Result).unwrap().html.contains("92%"));
            assert!(session.cache().contains(&EmailIdentifier::new("msg-1").unwrap()));
        }

        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::CacheHit);
    }

    #[tokio::test]
    async fn test_backend_error_shows_error_and_skips_cache() {
        let mut backend = MockAnalysisBackend::new();
        backend
            .expect_analyze()
            .returning(|_| Err(GuardError::Timeout(Duration::from_secs(10))));
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(INVOICE)).await;

        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::ErrorShown);
        let session = session.lock().await;
        let overlay = session.document().unwrap().overlay();
        assert!(overlay.banner(BannerPurpose::Error).is_some());
        assert!(overlay.banner(BannerPurpose::Loading).is_none());
        assert!(session.cache().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_analyze_is_abandoned() {
        let mut backend = MockAnalysisBackend::new();
        backend.expect_analyze().never();
        let html = r#"<html><body><div data-message-id="msg-1"></div></body></html>"#;
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(html)).await;

        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::Abandoned);
        assert!(session.lock().await.document().unwrap().overlay().is_empty());
    }

    #[tokio::test]
    async fn test_no_document() {
        let (dispatcher, _) = setup(MockAnalysisBackend::new(), BackendStatus::Connected, None).await;
        assert_eq!(dispatcher.dispatch(request("msg-1")).await, DispatchOutcome::NoDocument);
    }

    #[tokio::test]
    async fn test_request_for_email_no_longer_displayed() {
        let mut backend = MockAnalysisBackend::new();
        backend.expect_analyze().never();
        let (dispatcher, _) = setup(backend, BackendStatus::Connected, Some(INVOICE)).await;
        assert_eq!(dispatcher.dispatch(request("msg-0")).await, DispatchOutcome::Stale);
    }

    #[tokio::test]
    async fn test_startup_without_identifier_is_not_cached() {
        let mut backend = MockAnalysisBackend::new();
        backend.expect_analyze().times(1).returning(|_| Ok(safe(70)));
        let html = r#"<html><body><h2 class="hP">Hello</h2></body></html>"#;
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(html)).await;

        let outcome = dispatcher
            .dispatch(DispatchRequest {
                trigger: Trigger::Startup,
                identifier: None,
            })
            .await;
        assert_eq!(outcome, DispatchOutcome::Rendered);
        assert!(session.lock().await.cache().is_empty());
    }

    fn loading_shown(session: &Session) -> bool {
        session
            .document()
            .is_some_and(|d| d.overlay().banner(BannerPurpose::Loading).is_some())
    }

    #[tokio::test]
    async fn test_switch_during_analysis_leaves_no_loading_banner() {
        let backend = SlowBackend {
            delay: Duration::from_millis(200),
        };
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(INVOICE)).await;
        let dispatcher = Arc::new(dispatcher);
        let profile = LocatorProfile::gmail().unwrap();

        let pending = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(request("msg-1")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(loading_shown(&*session.lock().await));

        let other = r#"<html><body><div data-message-id="msg-2"><div class="a3s">see attached</div></div></body></html>"#;
        session.lock().await.load_document(inbox(other), &profile);
        assert_eq!(dispatcher.dispatch(request("msg-2")).await, DispatchOutcome::Abandoned);
        assert_eq!(pending.await.unwrap(), DispatchOutcome::Stale);

        let session = session.lock().await;
        assert!(!loading_shown(&session));
        assert!(session.document().unwrap().overlay().banner(BannerPurpose::Result).is_none());
        assert!(session.cache().contains(&EmailIdentifier::new("msg-1").unwrap()));
    }

    #[tokio::test]
    async fn test_late_answer_clears_its_loading_banner() {
        let backend = SlowBackend {
            delay: Duration::from_millis(200),
        };
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(INVOICE)).await;
        let dispatcher = Arc::new(dispatcher);
        let profile = LocatorProfile::gmail().unwrap();

        let pending = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(request("msg-1")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Thread view torn down; no email displayed while the answer is pending
        let empty = r#"<html><body><div role="main">Loading...</div></body></html>"#;
        session.lock().await.load_document(inbox(empty), &profile);
        assert!(loading_shown(&*session.lock().await));

        assert_eq!(pending.await.unwrap(), DispatchOutcome::Stale);
        assert!(!loading_shown(&*session.lock().await));
    }

    #[tokio::test]
    async fn test_late_answer_keeps_newer_loading_banner() {
        let backend = SlowBackend {
            delay: Duration::from_millis(200),
        };
        let (dispatcher, session) = setup(backend, BackendStatus::Connected, Some(INVOICE)).await;
        let dispatcher = Arc::new(dispatcher);
        let profile = LocatorProfile::gmail().unwrap();

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(request("msg-1")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let other = r#"<html><body><div role="main"><h2 data-thread-subject="">Lunch</h2><div data-message-id="msg-2">Friday?</div></div></body></html>"#;
        session.lock().await.load_document(inbox(other), &profile);
        let second = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(request("msg-2")).await }
        });

        assert_eq!(first.await.unwrap(), DispatchOutcome::Stale);
        assert!(loading_shown(&*session.lock().await));

        assert_eq!(second.await.unwrap(), DispatchOutcome::Rendered);
        assert!(!loading_shown(&*session.lock().await));
    }
}
