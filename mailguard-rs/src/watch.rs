//! File-backed page host
//!
//! Watches a saved webmail page on disk and reports every change to the
//! guard as a document load. The annotated page is written next to it.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{GuardError, Result};
use crate::runtime::HostHandle;

/// Watches one HTML file for changes
pub struct PageWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    page: PathBuf,
    file_name: OsString,
}

impl PageWatcher {
    pub fn new(page: &Path) -> Result<Self> {
        let file_name = page
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| GuardError::Config(format!("Not a file path: {}", page.display())))?;

        // Editors often replace the file, so watch its directory
        let dir = match page.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |result| {
                let _ = tx.send(result);
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .map_err(notify_error)?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(notify_error)?;
        debug!("Watching {:?} for {:?}", dir, file_name);

        Ok(Self {
            _watcher: watcher,
            rx,
            page: page.to_path_buf(),
            file_name,
        })
    }

    pub fn page(&self) -> &Path {
        &self.page
    }

    /// Whether any pending event concerns the page; drains the queue
    pub fn check_changes_nonblocking(&self) -> bool {
        let mut changed = false;
        for event in self.rx.try_iter() {
            match event {
                Ok(event) => {
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
                    {
                        changed = true;
                    }
                }
                Err(e) => debug!("Watch error: {}", e),
            }
        }
        changed
    }

    /// Wait up to `timeout` for the page to change
    pub async fn wait_for_change(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(100);

        while start.elapsed() < timeout {
            if self.check_changes_nonblocking() {
                return true;
            }
            tokio::time::sleep(poll_interval).await;
        }
        false
    }

    /// Read the page and hand it to the guard
    pub async fn feed(&self, host: &HostHandle, url: &Url) -> Result<()> {
        let html = tokio::fs::read_to_string(&self.page).await?;
        info!("Page {} loaded ({} bytes)", self.page.display(), html.len());
        host.load_document(url.clone(), html).await
    }
}

/// Write the annotated page; returns false if no page is loaded yet
pub async fn write_rendered(host: &HostHandle, out: &Path) -> Result<bool> {
    let Some(html) = host.rendered_html().await? else {
        return Ok(false);
    };
    tokio::fs::write(out, html).await?;
    debug!("Annotated page written to {}", out.display());
    Ok(true)
}

/// Default output path: `page.html` -> `page.guarded.html`
pub fn default_output(page: &Path) -> PathBuf {
    let stem = page
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    page.with_file_name(format!("{}.guarded.html", stem))
}

fn notify_error(e: notify::Error) -> GuardError {
    GuardError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
