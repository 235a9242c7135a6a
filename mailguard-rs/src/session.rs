//! Per-page session state
//!
//! Holds what used to be page-global: the displayed document and the
//! analysis cache. Shared between the dispatcher, the runtime and the host
//! handle behind one async mutex.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::cache::AnalysisCache;
use crate::document::Document;
use crate::locator::LocatorProfile;
use crate::models::{AnalysisResult, EmailIdentifier};
use crate::store::KeyValueStore;

pub type SharedSession = Arc<Mutex<Session>>;

pub struct Session {
    document: Option<Document>,
    cache: AnalysisCache,
    store: Arc<dyn KeyValueStore>,
    /// Last email seen on the page; the overlay belongs to it
    shown: Option<EmailIdentifier>,
    /// Dispatch that put up the loading banner
    loading: Option<u64>,
    dispatches: u64,
    /// Bumped whenever the page or its overlay changes
    revision: watch::Sender<u64>,
}

impl Session {
    pub fn new(cache: AnalysisCache, store: Arc<dyn KeyValueStore>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            document: None,
            cache,
            store,
            shown: None,
            loading: None,
            dispatches: 0,
            revision,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        self.document.as_mut()
    }

    /// Install a new page, or update the source of the current one
    ///
    /// Banners survive a source update the way injected elements survive a
    /// partial re-render of the page; badges do not. Once another email is
    /// displayed, only the disabled warning is kept.
    pub fn load_document(&mut self, document: Document, profile: &LocatorProfile) {
        match self.document.as_mut() {
            Some(current) => {
                current.set_url(document.url().clone());
                current.replace_source(document.source());
            }
            None => self.document = Some(document),
        }
        self.follow_displayed(profile);
        self.touch();
    }

    /// In-app navigation; the source stays, the displayed email may change
    pub fn set_url(&mut self, url: Url, profile: &LocatorProfile) {
        if let Some(document) = self.document.as_mut() {
            document.set_url(url);
        }
        self.follow_displayed(profile);
        self.touch();
    }

    fn follow_displayed(&mut self, profile: &LocatorProfile) {
        // A page without an identifier is a transient state, not a switch
        let Some(current) = self.current_identifier(profile) else {
            return;
        };

        if self.shown.as_ref().is_some_and(|shown| *shown != current) {
            if let Some(document) = self.document.as_mut() {
                if document.overlay_mut().clear_analysis() {
                    debug!("Switched to {}, cleared previous analysis", current);
                }
            }
            self.loading = None;
        }
        self.shown = Some(current);
    }

    /// Record that a dispatch is about to show the loading banner
    pub fn begin_loading(&mut self) -> u64 {
        self.dispatches += 1;
        self.loading = Some(self.dispatches);
        self.dispatches
    }

    /// Release the loading banner; false if it no longer belongs to `ticket`
    pub fn end_loading(&mut self, ticket: u64) -> bool {
        if self.loading == Some(ticket) {
            self.loading = None;
            true
        } else {
            false
        }
    }

    /// Identifier of the email displayed right now
    pub fn current_identifier(&self, profile: &LocatorProfile) -> Option<EmailIdentifier> {
        let document = self.document.as_ref()?;
        profile.identify(document.url(), &document.parse())
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Cached analysis for an identifier, marking it recently used
    pub fn cached(&mut self, id: &EmailIdentifier) -> Option<AnalysisResult> {
        self.cache.get(id)
    }

    /// Remember an analysis and persist the cache
    ///
    /// A persistence failure is logged and does not undo the in-memory entry.
    pub fn cache_result(&mut self, id: EmailIdentifier, result: AnalysisResult) {
        self.cache.insert(id, result);
        if let Err(e) = self.cache.persist(self.store.as_ref()) {
            warn!("Failed to persist analysis cache: {}", e);
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Signal that the rendered page changed
    pub fn touch(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}
