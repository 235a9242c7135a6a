//! mailguard-rs: phishing guard for webmail pages
//!
//! Detects which email is open in a webmail page, sends its content to an
//! external analysis backend and annotates the page with the verdict.
//!
//! # Features
//!
//! - Email change detection with a de-duplication guard
//! - Ordered fallback locators for subject, sender, body and identifiers
//! - Backend availability monitoring; analysis is disabled while it is down
//! - Bounded LRU cache of analyses, persisted across restarts
//! - Result, loading and error banners plus per-link risk badges
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! health_path = "/health"
//! health_interval_secs = 10
//! analyze_timeout_ms = 10000
//!
//! [detector]
//! poll_interval_ms = 1000
//! settle_delay_ms = 500
//!
//! [cache]
//! capacity = 50
//!
//! [storage]
//! path = "/var/lib/mailguard/store.json"
//!
//! [locators]
//! subject = ["h2[data-thread-subject]", ".hP"]
//! anchors = ["[data-message-id]", "[role=\"main\"]", "body"]
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod extractor;
pub mod links;
pub mod locator;
pub mod logging;
pub mod messages;
pub mod models;
pub mod monitor;
pub mod render;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod store;
pub mod watch;

pub use backend::{AnalysisBackend, HttpBackend};
pub use config::GuardConfig;
pub use error::{GuardError, Result};
pub use models::{AnalysisResult, EmailIdentifier, ExtractedEmail};
pub use runtime::{GuardRuntime, HostHandle, RuntimeHandle};
pub use settings::Settings;
