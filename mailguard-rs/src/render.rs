//! Banner and badge rendering
//!
//! Markup comes from askama templates, which escape everything the backend
//! sends. Banners are placed before the first anchor the profile finds on
//! the page; badges go right after the links the analysis knows about.

use askama::Template;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::document::{Banner, BannerPurpose, Document, Placement};
use crate::error::Result;
use crate::links::unwrap_redirect;
use crate::locator::{CssLocator, LocatorChain, LocatorProfile, LocatorStrategy};
use crate::models::{AnalysisResult, LinkAssessment};

/// Message shown when an analysis fails
pub const ANALYSIS_FAILED: &str = "Unable to analyze email. Please check the backend service.";

#[derive(Template)]
#[template(path = "loading.html")]
struct LoadingTemplate<'a> {
    id: &'a str,
}

#[derive(Template)]
#[template(path = "result.html")]
struct ResultTemplate<'a> {
    id: &'a str,
    trust_percent: u32,
    risk_label: String,
    explanation: Option<&'a str>,
    flags: &'a [String],
    links_analyzed: usize,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    id: &'a str,
    message: &'a str,
}

#[derive(Template)]
#[template(path = "disabled.html")]
struct DisabledTemplate<'a> {
    id: &'a str,
    endpoint: &'a str,
}

#[derive(Template)]
#[template(path = "badge.html")]
struct BadgeTemplate<'a> {
    color: &'a str,
    tooltip: String,
    trust_percent: u32,
}

/// Paints analysis state onto a [`Document`]
#[derive(Debug, Clone)]
pub struct Renderer {
    anchors: LocatorChain,
    links: CssLocator,
}

impl Renderer {
    pub fn new(profile: &LocatorProfile) -> Self {
        Self {
            anchors: profile.anchors.clone(),
            links: profile.links.clone(),
        }
    }

    /// Selector used to enumerate links, shared with [`Document::render`]
    pub fn link_selector(&self) -> &str {
        self.links.describe()
    }

    /// Insertion point for banners on this page
    pub fn placement(&self, page: &Html) -> Option<Placement> {
        let (strategy, anchor) = self.anchors.first(page)?;
        let selector = strategy.describe().to_string();

        let has_parent = anchor.parent().and_then(ElementRef::wrap).is_some();
        Some(if has_parent {
            Placement::Before(selector)
        } else {
            Placement::Prepend(selector)
        })
    }

    /// Returns false when the page has no anchor to attach the banner to
    fn insert(&self, document: &mut Document, purpose: BannerPurpose, html: String) -> bool {
        let placement = self.placement(&document.parse());
        let overlay = document.overlay_mut();
        overlay.remove_banner(purpose);

        match placement {
            Some(placement) => {
                debug!("Inserting {:?} banner at {:?}", purpose, placement);
                overlay.insert_banner(Banner {
                    purpose,
                    placement,
                    html: html.trim().to_string(),
                });
                true
            }
            None => {
                warn!("Could not find insertion point for {:?} banner", purpose);
                false
            }
        }
    }

    pub fn show_loading(&self, document: &mut Document) -> Result<bool> {
        let html = LoadingTemplate {
            id: BannerPurpose::Loading.element_id(),
        }
        .render()?;

        let overlay = document.overlay_mut();
        overlay.remove_banner(BannerPurpose::Result);
        overlay.remove_banner(BannerPurpose::Error);
        Ok(self.insert(document, BannerPurpose::Loading, html))
    }

    /// Show the verdict banner and the link badges
    pub fn show_result(&self, document: &mut Document, result: &AnalysisResult) -> Result<bool> {
        let email = &result.email;
        let html = ResultTemplate {
            id: BannerPurpose::Result.element_id(),
            trust_percent: email.trust_percent,
            risk_label: email.risk_level.display_label(),
            explanation: email.explanation.as_deref().filter(|e| !e.is_empty()),
            flags: &email.flags,
            links_analyzed: result.links.len(),
        }
        .render()?;

        let overlay = document.overlay_mut();
        overlay.remove_banner(BannerPurpose::Loading);
        overlay.remove_banner(BannerPurpose::Error);
        let inserted = self.insert(document, BannerPurpose::Result, html);

        self.add_link_badges(document, result)?;
        Ok(inserted)
    }

    pub fn show_error(&self, document: &mut Document, message: &str) -> Result<bool> {
        let html = ErrorTemplate {
            id: BannerPurpose::Error.element_id(),
            message,
        }
        .render()?;

        let overlay = document.overlay_mut();
        overlay.remove_banner(BannerPurpose::Loading);
        overlay.remove_banner(BannerPurpose::Result);
        Ok(self.insert(document, BannerPurpose::Error, html))
    }

    /// Warning shown while the backend is unreachable
    pub fn show_disabled(&self, document: &mut Document, endpoint: &str) -> Result<bool> {
        let html = DisabledTemplate {
            id: BannerPurpose::Disabled.element_id(),
            endpoint,
        }
        .render()?;
        Ok(self.insert(document, BannerPurpose::Disabled, html))
    }

    pub fn clear(&self, document: &mut Document, purpose: BannerPurpose) -> bool {
        document.overlay_mut().remove_banner(purpose)
    }

    /// Badge every link the analysis has a verdict for
    ///
    /// Links are matched by unwrapped URL. Only the first link pointing at a
    /// given URL gets a badge, and a link that already has one is skipped.
    /// Returns the number of badges added.
    pub fn add_link_badges(&self, document: &mut Document, result: &AnalysisResult) -> Result<usize> {
        if result.links.is_empty() {
            return Ok(0);
        }

        let mut pending: Vec<(usize, &LinkAssessment)> = Vec::new();
        {
            let page = document.parse();
            let mut seen = HashSet::new();

            for (index, link) in self.links.find_all(&page).into_iter().enumerate() {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                let url = unwrap_redirect(href);
                if !seen.insert(url.clone()) || document.overlay().has_badge(index) {
                    continue;
                }
                if let Some(assessment) = result.link(&url) {
                    pending.push((index, assessment));
                }
            }
        }

        let mut added = 0;
        for (index, assessment) in pending {
            let html = BadgeTemplate {
                color: assessment.risk_level.badge_color(),
                tooltip: assessment.tooltip(),
                trust_percent: assessment.trust_percent,
            }
            .render()?;

            if document.overlay_mut().add_badge(index, html.trim().to_string()) {
                added += 1;
            }
        }

        debug!("Added {} link badges", added);
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Assessment, RiskLevel};
    use url::Url;

    const THREAD: &str = r#"<html><head></head><body><div role="main"><h2 data-thread-subject="">Invoice Due</h2><div data-message-id="msg-1"><div class="a3s"><p>Pay now</p><a href="https://www.google.com/url?q=https%3A%2F%2Fpay.example.com%2Finvoice&amp;sa=D">Pay</a> <a href="https://pay.example.com/invoice">again</a> <a href="https://docs.example.org">Docs</a></div></div></div></body></html>"#;

    fn renderer() -> Renderer {
        Renderer::new(&LocatorProfile::gmail().unwrap())
    }

    fn document(source: &str) -> Document {
        Document::new(Url::parse("https://mail.google.com/mail/u/0/#inbox/msg-1").unwrap(), source)
    }

    fn assessment(href: &str, trust: u32, risk: RiskLevel) -> LinkAssessment {
        LinkAssessment {
            href: href.to_string(),
            text: None,
            trust_percent: trust,
            risk_level: risk,
            explanation: Some("Shortened or lookalike domain".to_string()),
            flags: vec!["new domain".to_string()],
            phishing_prob: None,
        }
    }

    fn result(trust: u32, risk: RiskLevel, links: Vec<LinkAssessment>) -> AnalysisResult {
        AnalysisResult {
            email: Assessment {
                trust_percent: trust,
                risk_level: risk,
                explanation: None,
                flags: vec![],
                phishing_prob: None,
            },
            links,
            overall_risk_level: None,
        }
    }

    #[test]
    fn test_placement_prefers_message_container() {
        let page = Html::parse_document(THREAD);
        assert_eq!(
            renderer().placement(&page),
            Some(Placement::Before("[data-message-id]".to_string()))
        );
    }

    #[test]
    fn test_placement_falls_back_to_body() {
        let page = Html::parse_document("<html><body><p>nothing here</p></body></html>");
        assert_eq!(renderer().placement(&page), Some(Placement::Before("body".to_string())));
    }

    #[test]
    fn test_safe_result_without_links() {
        let renderer = renderer();
        let mut doc = document(THREAD);
        renderer.show_loading(&mut doc).unwrap();

        let inserted = renderer
            .show_result(&mut doc, &result(92, RiskLevel::Safe, vec![]))
            .unwrap();
        assert!(inserted);

        let overlay = doc.overlay();
        assert!(overlay.banner(BannerPurpose::Loading).is_none());
        let banner = overlay.banner(BannerPurpose::Result).unwrap();
        assert!(banner.html.contains("92%"));
        assert!(banner.html.contains("SAFE"));
        assert!(banner.html.contains("Links analyzed: <strong>0</strong>"));
        assert_eq!(overlay.badge_count(), 0);
    }

    #[test]
    fn test_backend_text_is_escaped() {
        let renderer = renderer();
        let mut doc = document(THREAD);
        let mut analysis = result(10, RiskLevel::Dangerous, vec![]);
        analysis.email.explanation = Some("<script>alert(1)</script>".to_string());
        analysis.email.flags = vec!["<b>urgent</b>".to_string()];

        renderer.show_result(&mut doc, &analysis).unwrap();
        let html = &doc.overlay().banner(BannerPurpose::Result).unwrap().html;
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<b>urgent"));
    }

    #[test]
    fn test_error_replaces_loading_and_result() {
        let renderer = renderer();
        let mut doc = document(THREAD);
        renderer.show_result(&mut doc, &result(50, RiskLevel::Suspicious, vec![])).unwrap();
        renderer.show_loading(&mut doc).unwrap();
        assert!(doc.overlay().banner(BannerPurpose::Result).is_none());

        renderer.show_error(&mut doc, ANALYSIS_FAILED).unwrap();
        let overlay = doc.overlay();
        assert!(overlay.banner(BannerPurpose::Loading).is_none());
        assert!(overlay.banner(BannerPurpose::Error).unwrap().html.contains("Unable to analyze email"));
        assert_eq!(overlay.banners().len(), 1);
    }

    #[test]
    fn test_badges_by_unwrapped_url_once_per_url() {
        let renderer = renderer();
        let mut doc = document(THREAD);
        let analysis = result(
            40,
            RiskLevel::Risky,
            vec![
                assessment("https://pay.example.com/invoice", 12, RiskLevel::Dangerous),
                assessment("https://docs.example.org", 95, RiskLevel::Safe),
                assessment("https://unrelated.example.net", 50, RiskLevel::Suspicious),
            ],
        );

        assert_eq!(renderer.add_link_badges(&mut doc, &analysis).unwrap(), 2);
        let overlay = doc.overlay();
        assert!(overlay.has_badge(0));
        assert!(!overlay.has_badge(1));
        assert!(overlay.has_badge(2));
        assert!(overlay.badge(0).unwrap().contains("12% safe"));
        assert!(overlay.badge(0).unwrap().contains("#dc3545"));
        assert!(overlay.badge(2).unwrap().contains("#28a745"));
    }

    #[test]
    fn test_badges_are_idempotent() {
        let renderer = renderer();
        let mut doc = document(THREAD);
        let analysis = result(
            40,
            RiskLevel::Risky,
            vec![assessment("https://docs.example.org", 95, RiskLevel::Safe)],
        );

        renderer.show_result(&mut doc, &analysis).unwrap();
        renderer.show_result(&mut doc, &analysis).unwrap();
        assert_eq!(doc.overlay().badge_count(), 1);

        let html = doc.render(renderer.link_selector()).unwrap();
        assert_eq!(html.matches("phishing-badge").count(), 1);
        assert_eq!(html.matches("phishing-detector-banner").count(), 1);
    }

    #[test]
    fn test_disabled_banner_independent_of_result() {
        let renderer = renderer();
        let mut doc = document(THREAD);
        renderer.show_disabled(&mut doc, "http://localhost:8000/analyze_email").unwrap();
        renderer.show_loading(&mut doc).unwrap();
        assert!(doc.overlay().banner(BannerPurpose::Disabled).is_some());

        assert!(renderer.clear(&mut doc, BannerPurpose::Disabled));
        assert!(doc.overlay().banner(BannerPurpose::Loading).is_some());
    }
}
