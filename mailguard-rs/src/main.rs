//! mailguard: phishing guard for saved webmail pages
//!
//! # Usage
//!
//! ```bash
//! # Annotate a page every time it changes on disk
//! mailguard watch thread.html --out thread.guarded.html
//!
//! # Analyze a page once and print the annotated HTML
//! mailguard analyze thread.html
//!
//! # Backend checks
//! mailguard health
//! mailguard test-api
//!
//! # Settings and cache
//! mailguard settings set --api-endpoint http://localhost:8000/analyze_email
//! mailguard cache list
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use mailguard_rs::backend::{AnalysisBackend, HttpBackend};
use mailguard_rs::cache::{AnalysisCache, CACHE_KEY};
use mailguard_rs::logging::init_logging;
use mailguard_rs::messages::MessageHandler;
use mailguard_rs::monitor::AvailabilityMonitor;
use mailguard_rs::store::{JsonFileStore, KeyValueStore};
use mailguard_rs::watch::{default_output, write_rendered, PageWatcher};
use mailguard_rs::{GuardConfig, GuardRuntime, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const DEFAULT_PAGE_URL: &str = "https://mail.google.com/mail/u/0/#inbox";

#[derive(Parser)]
#[command(name = "mailguard")]
#[command(about = "Phishing analysis overlay for webmail pages", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key/value store file, overrides [storage] path
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a page file and keep an annotated copy up to date
    Watch {
        /// Saved webmail page
        page: PathBuf,
        /// URL the page was loaded from
        #[arg(long, default_value = DEFAULT_PAGE_URL)]
        url: String,
        /// Annotated output file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Analyze a page once
    Analyze {
        /// Saved webmail page
        page: PathBuf,
        /// URL the page was loaded from
        #[arg(long, default_value = DEFAULT_PAGE_URL)]
        url: String,
        /// Write the annotated page here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check the backend health endpoint
    Health,
    /// Send the sample email to the analyze endpoint
    TestApi,
    /// Handle one inbound message, e.g. '{"action":"checkBackend"}'
    Message {
        /// Message JSON
        json: String,
    },
    /// Show or change user settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Inspect or clear the analysis cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print current settings
    Show,
    /// Update settings
    Set {
        #[arg(long)]
        api_endpoint: Option<String>,
        #[arg(long)]
        auto_analyze: Option<bool>,
        #[arg(long)]
        show_notifications: Option<bool>,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached email identifiers, most recent first
    List,
    /// Remove every cached analysis
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GuardConfig::from_file(path)?,
        None => GuardConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.storage.path = store.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;
    config.validate()?;

    match &cli.config {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No config file specified, using defaults"),
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(&config.storage.path)
            .with_context(|| format!("opening store {}", config.storage.path.display()))?,
    );
    let settings = Settings::load(store.as_ref())?;

    match cli.command {
        Commands::Watch { page, url, out } => {
            let out = out.unwrap_or_else(|| default_output(&page));
            watch(config, settings, store, &page, &url, &out).await?;
        }
        Commands::Analyze { page, url, out } => {
            analyze(config, settings, store, &page, &url, out.as_deref()).await?;
        }
        Commands::Health => {
            let backend = HttpBackend::from_settings(&settings, &config.backend)?;
            let body = backend
                .check_health()
                .await
                .with_context(|| format!("health check against {}", backend.health_url()))?;
            println!("✓ Backend healthy at {}", backend.health_url());
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::TestApi => {
            let backend = HttpBackend::from_settings(&settings, &config.backend)?;
            let result = backend
                .test_analysis()
                .await
                .with_context(|| format!("test analysis against {}", backend.analyze_url()))?;
            println!("✓ Analyze endpoint working");
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Message { json } => {
            let raw: serde_json::Value = serde_json::from_str(&json).context("parsing message")?;
            let backend: Arc<dyn AnalysisBackend> =
                Arc::new(HttpBackend::from_settings(&settings, &config.backend)?);
            let monitor = Arc::new(AvailabilityMonitor::new(
                backend.clone(),
                config.backend.health_interval(),
            ));
            monitor.check_now().await;

            let response = MessageHandler::new(monitor, backend, store.clone())
                .handle_value(raw)
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Settings { command } => match command {
            SettingsCommands::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsCommands::Set {
                api_endpoint,
                auto_analyze,
                show_notifications,
            } => {
                let mut updated = settings.clone();
                if let Some(endpoint) = api_endpoint {
                    updated.api_endpoint = endpoint;
                }
                if let Some(enabled) = auto_analyze {
                    updated.auto_analyze = enabled;
                }
                if let Some(enabled) = show_notifications {
                    updated.show_notifications = enabled;
                }
                updated.save(store.as_ref())?;
                println!("✓ Settings saved");
                println!("{}", serde_json::to_string_pretty(&updated)?);
            }
        },
        Commands::Cache { command } => match command {
            CacheCommands::List => {
                let mut cache = AnalysisCache::load(store.as_ref(), config.cache.capacity)?;
                let ids = cache.identifiers();
                if ids.is_empty() {
                    println!("No cached analyses.");
                } else {
                    println!("{:<40} {:>6} {:<12}", "Email", "Trust", "Risk");
                    println!("{:-<60}", "");
                    for id in &ids {
                        if let Some(result) = cache.get(id) {
                            println!(
                                "{:<40} {:>5}% {:<12}",
                                id.as_str(),
                                result.email.trust_percent,
                                result.email.risk_level.as_str()
                            );
                        }
                    }
                    println!("\nTotal: {} of {}", ids.len(), cache.capacity());
                }
            }
            CacheCommands::Clear => {
                // Removed without decoding, so an unreadable cache can be cleared too
                store.remove(CACHE_KEY)?;
                println!("✓ Analysis cache cleared");
            }
        },
    }

    Ok(())
}

fn parse_url(url: &str) -> anyhow::Result<Url> {
    Url::parse(url).with_context(|| format!("invalid page URL '{}'", url))
}

async fn watch(
    config: GuardConfig,
    settings: Settings,
    store: Arc<dyn KeyValueStore>,
    page: &Path,
    url: &str,
    out: &Path,
) -> anyhow::Result<()> {
    let url = parse_url(url)?;
    let backend: Arc<dyn AnalysisBackend> =
        Arc::new(HttpBackend::from_settings(&settings, &config.backend)?);

    let handle = GuardRuntime::new(config, settings, backend, store).start()?;
    let host = handle.host().clone();
    let mut changes = host.subscribe_changes().await;

    let watcher = PageWatcher::new(page)?;
    watcher.feed(&host, &url).await?;
    info!("Watching {} -> {}", page.display(), out.display());

    loop {
        tokio::select! {
            changed = watcher.wait_for_change(Duration::from_millis(500)) => {
                if changed {
                    if let Err(e) = watcher.feed(&host, &url).await {
                        warn!("Failed to load {}: {}", page.display(), e);
                    }
                }
            }
            result = changes.changed() => {
                if result.is_err() {
                    break;
                }
                write_rendered(&host, out).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown();
    Ok(())
}

async fn analyze(
    config: GuardConfig,
    mut settings: Settings,
    store: Arc<dyn KeyValueStore>,
    page: &Path,
    url: &str,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let url = parse_url(url)?;
    let html = tokio::fs::read_to_string(page)
        .await
        .with_context(|| format!("reading {}", page.display()))?;

    let backend: Arc<dyn AnalysisBackend> =
        Arc::new(HttpBackend::from_settings(&settings, &config.backend)?);

    // Only the explicit request below may dispatch
    settings.auto_analyze = false;
    let handle = GuardRuntime::new(config, settings, backend, store).start()?;

    if !handle.monitor().check_now().await {
        warn!("Backend not connected, the page will only carry the warning banner");
    }

    handle.host().load_document(url, html).await?;
    let report = handle.analyze_now().await?;
    info!("Analysis outcome: {:?}", report.outcome);

    let rendered = handle
        .host()
        .rendered_html()
        .await?
        .context("no page loaded")?;

    match out {
        Some(path) => {
            tokio::fs::write(path, rendered).await?;
            println!("✓ Annotated page written to {} ({:?})", path.display(), report.outcome);
        }
        None => println!("{}", rendered),
    }

    handle.shutdown();
    Ok(())
}
