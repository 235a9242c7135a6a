//! The host page and the elements injected into it
//!
//! A [`Document`] is the current page (URL plus HTML source) together with
//! an [`Overlay`] of banners and link badges. Reading goes through `scraper`;
//! [`Document::render`] streams the source through `lol_html` and splices the
//! overlay in.

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings, Selector as RewriteSelector};
use scraper::Html;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

use crate::error::{GuardError, Result};

/// What a banner is for; at most one banner per purpose exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BannerPurpose {
    Loading,
    Result,
    Error,
    /// Backend unavailable warning
    Disabled,
}

impl BannerPurpose {
    /// DOM id of the injected element
    pub fn element_id(self) -> &'static str {
        match self {
            BannerPurpose::Loading => "phishing-detector-loading",
            BannerPurpose::Result => "phishing-detector-banner",
            BannerPurpose::Error => "phishing-detector-error",
            BannerPurpose::Disabled => "phishing-detector-warning",
        }
    }
}

/// Where a banner goes relative to its anchor element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Immediately before the first element matching the selector
    Before(String),
    /// As first child of the first element matching the selector
    Prepend(String),
}

impl Placement {
    pub fn selector(&self) -> &str {
        match self {
            Placement::Before(s) | Placement::Prepend(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub purpose: BannerPurpose,
    pub placement: Placement,
    pub html: String,
}

/// Elements injected into the page
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    banners: Vec<Banner>,
    /// Badge markup keyed by the link's position among the page's links
    badges: BTreeMap<usize, String>,
}

impl Overlay {
    /// Insert a banner, replacing any banner with the same purpose
    pub fn insert_banner(&mut self, banner: Banner) {
        self.remove_banner(banner.purpose);
        self.banners.push(banner);
    }

    /// Returns true if a banner was removed
    pub fn remove_banner(&mut self, purpose: BannerPurpose) -> bool {
        let before = self.banners.len();
        self.banners.retain(|b| b.purpose != purpose);
        before != self.banners.len()
    }

    pub fn banner(&self, purpose: BannerPurpose) -> Option<&Banner> {
        self.banners.iter().find(|b| b.purpose == purpose)
    }

    /// Banners in insertion order
    pub fn banners(&self) -> &[Banner] {
        &self.banners
    }

    pub fn has_badge(&self, link_index: usize) -> bool {
        self.badges.contains_key(&link_index)
    }

    /// Attach a badge to a link unless it already has one
    pub fn add_badge(&mut self, link_index: usize, html: String) -> bool {
        if self.has_badge(link_index) {
            return false;
        }
        self.badges.insert(link_index, html);
        true
    }

    pub fn badge(&self, link_index: usize) -> Option<&str> {
        self.badges.get(&link_index).map(String::as_str)
    }

    pub fn badge_count(&self) -> usize {
        self.badges.len()
    }

    pub fn clear_badges(&mut self) {
        self.badges.clear();
    }

    /// Drop everything painted for one email; the disabled warning stays
    pub fn clear_analysis(&mut self) -> bool {
        let before = self.banners.len() + self.badges.len();
        self.banners.retain(|b| b.purpose == BannerPurpose::Disabled);
        self.badges.clear();
        before != self.banners.len() + self.badges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banners.is_empty() && self.badges.is_empty()
    }
}

/// Current page state
#[derive(Debug, Clone)]
pub struct Document {
    url: Url,
    source: String,
    overlay: Overlay,
}

impl Document {
    pub fn new(url: Url, source: impl Into<String>) -> Self {
        Self {
            url,
            source: source.into(),
            overlay: Overlay::default(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parse the current source for querying
    pub fn parse(&self) -> Html {
        Html::parse_document(&self.source)
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut Overlay {
        &mut self.overlay
    }

    /// Replace the page content; badges belonged to the old links and go away
    pub fn replace_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.overlay.clear_badges();
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    /// Page source with banners and badges spliced in
    pub fn render(&self, link_selector: &str) -> Result<String> {
        if self.overlay.is_empty() {
            return Ok(self.source.clone());
        }

        // Group banners per anchor, preserving insertion order
        let mut groups: Vec<(String, String, String)> = Vec::new();
        for banner in self.overlay.banners() {
            let selector = banner.placement.selector();
            validate_rewrite_selector(selector)?;

            let index = match groups.iter().position(|(s, _, _)| s == selector) {
                Some(index) => index,
                None => {
                    groups.push((selector.to_string(), String::new(), String::new()));
                    groups.len() - 1
                }
            };
            match banner.placement {
                Placement::Before(_) => groups[index].1.push_str(&banner.html),
                Placement::Prepend(_) => groups[index].2.push_str(&banner.html),
            }
        }

        let mut handlers = Vec::new();

        for (selector, before, prepend) in groups {
            let mut done = false;
            handlers.push(element!(selector.as_str(), move |el| {
                if !done {
                    done = true;
                    if !before.is_empty() {
                        el.before(&before, ContentType::Html);
                    }
                    if !prepend.is_empty() {
                        el.prepend(&prepend, ContentType::Html);
                    }
                }
                Ok(())
            }));
        }

        if self.overlay.badge_count() > 0 {
            validate_rewrite_selector(link_selector)?;
            let badges = &self.overlay.badges;
            let mut index = 0usize;
            handlers.push(element!(link_selector, move |el| {
                if let Some(badge) = badges.get(&index) {
                    el.after(badge, ContentType::Html);
                }
                index += 1;
                Ok(())
            }));
        }

        debug!(
            "Rendering {} banners and {} badges",
            self.overlay.banners().len(),
            self.overlay.badge_count()
        );

        rewrite_str(
            &self.source,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::new()
            },
        )
        .map_err(|e| GuardError::Render(e.to_string()))
    }
}

/// Check a selector against the rewriter, whose syntax is narrower than the parser's
pub fn validate_rewrite_selector(selector: &str) -> Result<()> {
    selector
        .parse::<RewriteSelector>()
        .map(|_| ())
        .map_err(|e| GuardError::Selector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })
}
