//! Pluggable locator strategies
//!
//! Webmail markup changes often, so every semantic field (subject, sender,
//! body, identifier, banner anchor) is found through an ordered list of
//! strategies. The list is a priority order: the first strategy that finds
//! something wins, later ones are only fallbacks.

use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::LocatorConfig;
use crate::error::{GuardError, Result};
use crate::models::EmailIdentifier;

/// A rule for finding the element that represents a field
pub trait LocatorStrategy: Send + Sync + fmt::Debug {
    /// Human readable form, used in logs
    fn describe(&self) -> &str;

    /// First matching element in document order
    fn find<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>>;

    /// All matching elements in document order
    fn find_all<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        self.find(document).into_iter().collect()
    }
}

/// Locator backed by a CSS selector
#[derive(Clone)]
pub struct CssLocator {
    source: String,
    selector: Selector,
}

impl CssLocator {
    pub fn parse(source: &str) -> Result<Self> {
        let selector = Selector::parse(source).map_err(|e| GuardError::Selector {
            selector: source.to_string(),
            reason: format!("{:?}", e),
        })?;
        Ok(Self {
            source: source.to_string(),
            selector,
        })
    }
}

impl fmt::Debug for CssLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CssLocator").field(&self.source).finish()
    }
}

impl LocatorStrategy for CssLocator {
    fn describe(&self) -> &str {
        &self.source
    }

    fn find<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document.select(&self.selector).next()
    }

    fn find_all<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        document.select(&self.selector).collect()
    }
}

/// Ordered fallback list of strategies
#[derive(Debug, Clone, Default)]
pub struct LocatorChain {
    strategies: Vec<Arc<dyn LocatorStrategy>>,
}

impl LocatorChain {
    pub fn new(strategies: Vec<Arc<dyn LocatorStrategy>>) -> Self {
        Self { strategies }
    }

    /// Build a chain of CSS locators
    pub fn css<S: AsRef<str>>(selectors: &[S]) -> Result<Self> {
        let strategies = selectors
            .iter()
            .map(|s| CssLocator::parse(s.as_ref()).map(|l| Arc::new(l) as Arc<dyn LocatorStrategy>))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { strategies })
    }

    pub fn strategies(&self) -> &[Arc<dyn LocatorStrategy>] {
        &self.strategies
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// First element found by the highest-priority strategy that finds one
    pub fn first<'a>(&self, document: &'a Html) -> Option<(&dyn LocatorStrategy, ElementRef<'a>)> {
        for strategy in &self.strategies {
            let found = strategy.find(document);
            debug!(
                "Locator \"{}\": {}",
                strategy.describe(),
                if found.is_some() { "FOUND" } else { "not found" }
            );
            if let Some(element) = found {
                return Some((strategy.as_ref(), element));
            }
        }
        None
    }

    /// First non-empty value produced by `read` over the strategies in order
    pub fn first_value<F>(&self, document: &Html, read: F) -> Option<String>
    where
        F: Fn(ElementRef<'_>) -> Option<String>,
    {
        self.strategies.iter().find_map(|strategy| {
            let element = strategy.find(document)?;
            let value = read(element).filter(|v| !v.is_empty());
            debug!(
                "Locator \"{}\": {}",
                strategy.describe(),
                if value.is_some() { "FOUND" } else { "empty" }
            );
            value
        })
    }
}

/// Reads an identifier from an attribute of the first matching element
#[derive(Debug, Clone)]
pub struct MarkerLocator {
    locator: CssLocator,
    attribute: String,
}

impl MarkerLocator {
    pub fn new(selector: &str, attribute: &str) -> Result<Self> {
        Ok(Self {
            locator: CssLocator::parse(selector)?,
            attribute: attribute.to_string(),
        })
    }

    pub fn read(&self, document: &Html) -> Option<EmailIdentifier> {
        self.locator
            .find(document)
            .and_then(|el| el.value().attr(&self.attribute))
            .and_then(EmailIdentifier::new)
    }
}

/// The full set of locators for one webmail application
#[derive(Debug, Clone)]
pub struct LocatorProfile {
    pub subject: LocatorChain,
    pub sender: LocatorChain,
    pub body: LocatorChain,
    /// Used for the body text when the body locators yield no text
    pub body_fallback: LocatorChain,
    /// Query parameter of the page URL carrying the message id
    pub url_parameter: Option<String>,
    pub markers: Vec<MarkerLocator>,
    /// Element wrapping the open message
    pub container: LocatorChain,
    /// Candidate banner insertion points, in priority order
    pub anchors: LocatorChain,
    pub links: CssLocator,
}

impl LocatorProfile {
    /// Locators for Gmail's web interface
    pub fn gmail() -> Result<Self> {
        Self::from_config(&LocatorConfig::default())
    }

    pub fn from_config(config: &LocatorConfig) -> Result<Self> {
        let markers = config
            .markers
            .iter()
            .map(|m| MarkerLocator::new(&m.selector, &m.attribute))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            subject: LocatorChain::css(&config.subject)?,
            sender: LocatorChain::css(&config.sender)?,
            body: LocatorChain::css(&config.body)?,
            body_fallback: LocatorChain::css(&config.body_fallback)?,
            url_parameter: config.url_parameter.clone().filter(|p| !p.is_empty()),
            markers,
            container: LocatorChain::css(&config.container)?,
            anchors: LocatorChain::css(&config.anchors)?,
            links: CssLocator::parse(&config.links)?,
        })
    }

    /// Identifier of the email currently displayed, if any
    ///
    /// The URL parameter wins over DOM markers; markers are tried in order.
    pub fn identify(&self, url: &Url, document: &Html) -> Option<EmailIdentifier> {
        if let Some(param) = &self.url_parameter {
            let from_url = url
                .query_pairs()
                .find(|(key, _)| key == param.as_str())
                .and_then(|(_, value)| EmailIdentifier::new(value.into_owned()));
            if from_url.is_some() {
                return from_url;
            }
        }

        self.markers.iter().find_map(|marker| marker.read(document))
    }

    /// Whether a message container is present in the document
    pub fn has_container(&self, document: &Html) -> bool {
        self.container.first(document).is_some()
    }
}
