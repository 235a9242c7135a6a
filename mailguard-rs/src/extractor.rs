//! Email extraction from the webmail page

use scraper::{ElementRef, Html};
use std::collections::HashSet;
use tracing::debug;

use crate::links::{is_ignored_href, is_web_url, truncate_label, unwrap_redirect, MAX_LINK_TEXT};
use crate::locator::{LocatorProfile, LocatorStrategy};
use crate::models::{ExtractedEmail, LinkRef};

/// Pulls subject, sender, body and links out of a page
#[derive(Debug, Clone)]
pub struct EmailExtractor {
    profile: LocatorProfile,
}

impl EmailExtractor {
    pub fn new(profile: LocatorProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LocatorProfile {
        &self.profile
    }

    /// Extract whatever the page offers
    ///
    /// Never fails: missing fields are left empty and the caller decides
    /// whether the result is worth analyzing.
    pub fn extract(&self, page: &Html) -> ExtractedEmail {
        let subject = self
            .profile
            .subject
            .first_value(page, |el| Some(element_text(el)))
            .unwrap_or_default();

        let sender = self
            .profile
            .sender
            .first_value(page, read_sender)
            .unwrap_or_default();

        let (mut body_text, body_html) = match self.profile.body.first(page) {
            Some((_, body)) => (element_text(body), body.inner_html()),
            None => (String::new(), String::new()),
        };

        if body_text.is_empty() {
            debug!("Body not found via body locators, trying main content");
            body_text = self
                .profile
                .body_fallback
                .first(page)
                .map(|(_, main)| element_text(main))
                .unwrap_or_default();
        }

        let links = self.extract_links(page);

        debug!(
            "Extracted email: subject={:?} sender={:?} body_len={} links={}",
            subject.chars().take(40).collect::<String>(),
            sender.chars().take(40).collect::<String>(),
            body_text.len(),
            links.len()
        );

        ExtractedEmail {
            sender,
            subject,
            body_text,
            body_html,
            links,
        }
    }

    /// Web links in document order, unwrapped and deduplicated by URL
    fn extract_links(&self, page: &Html) -> Vec<LinkRef> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for anchor in self.profile.links.find_all(page) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if is_ignored_href(href) {
                continue;
            }

            let href = unwrap_redirect(href);
            if !is_web_url(&href) || !seen.insert(href.clone()) {
                continue;
            }

            links.push(LinkRef {
                text: truncate_label(&element_text(anchor), MAX_LINK_TEXT),
                href,
            });
        }

        links
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// `email` attribute, then a `mailto:` target, then the visible text
fn read_sender(element: ElementRef<'_>) -> Option<String> {
    let value = element.value();

    if let Some(email) = value.attr("email").map(str::trim).filter(|e| !e.is_empty()) {
        return Some(email.to_string());
    }

    if let Some(address) = value
        .attr("href")
        .and_then(|href| href.strip_prefix("mailto:"))
        .map(str::trim)
        .filter(|a| !a.is_empty())
    {
        return Some(address.to_string());
    }

    Some(element_text(element))
}
