//! Blocklist feed sources.
//!
//! # Responsibilities
//! - Parse source URLs into fetchable [`FeedSource`]s
//! - Fetch feed text over HTTP(S), Gopher or from a local file
//! - Watch the override file for changes
//!
//! # Design Decisions
//! - Every fetch is bounded by the configured timeout and a size cap
//! - Gopher feeds use the same framing the server speaks; the `.` terminator
//!   line is stripped before parsing

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use url::Url;

/// Largest feed body accepted from any source.
pub const MAX_FEED_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_GOPHER_PORT: u16 = 70;

/// Errors from fetching or watching feeds.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unsupported blocklist source {0}")]
    Unsupported(String),

    #[error("http fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("feed larger than {MAX_FEED_BYTES} bytes")]
    TooLarge,

    #[error("feed is not valid UTF-8")]
    Encoding,

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Where a feed comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Http(Url),
    Gopher { host: String, port: u16, selector: String },
    File(PathBuf),
}

impl FeedSource {
    pub fn parse(source: &str) -> Result<Self, FeedError> {
        let url = Url::parse(source).map_err(|_| FeedError::Unsupported(source.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(FeedSource::Http(url)),
            "gopher" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| FeedError::Unsupported(source.to_string()))?
                    .to_string();
                let port = url.port().unwrap_or(DEFAULT_GOPHER_PORT);
                Ok(FeedSource::Gopher {
                    host,
                    port,
                    selector: gopher_selector(url.path()),
                })
            }
            "file" => url
                .to_file_path()
                .map(FeedSource::File)
                .map_err(|_| FeedError::Unsupported(source.to_string())),
            _ => Err(FeedError::Unsupported(source.to_string())),
        }
    }

    /// Fetch the feed body.
    pub async fn fetch(&self, client: &reqwest::Client, timeout: Duration) -> Result<String, FeedError> {
        let fut = async {
            match self {
                FeedSource::Http(url) => fetch_http(client, url).await,
                FeedSource::Gopher { host, port, selector } => {
                    fetch_gopher(host, *port, selector).await
                }
                FeedSource::File(path) => read_file(path).await,
            }
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| FeedError::Timeout(timeout))?
    }
}

/// `/0/path` → `/path`: the first path segment of a gopher URL is the item type.
fn gopher_selector(path: &str) -> String {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let mut chars = rest.chars();
    match chars.next() {
        Some(_) => chars.as_str().to_string(),
        None => String::new(),
    }
}

async fn fetch_http(client: &reqwest::Client, url: &Url) -> Result<String, FeedError> {
    let response = client.get(url.clone()).send().await?.error_for_status()?;
    if response.content_length().is_some_and(|len| len as usize > MAX_FEED_BYTES) {
        return Err(FeedError::TooLarge);
    }
    let body = response.bytes().await?;
    if body.len() > MAX_FEED_BYTES {
        return Err(FeedError::TooLarge);
    }
    String::from_utf8(body.to_vec()).map_err(|_| FeedError::Encoding)
}

async fn fetch_gopher(host: &str, port: u16, selector: &str) -> Result<String, FeedError> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(format!("{selector}\r\n").as_bytes()).await?;

    let mut body = Vec::new();
    let read = (&mut stream)
        .take(MAX_FEED_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .await?;
    if read > MAX_FEED_BYTES {
        return Err(FeedError::TooLarge);
    }
    let text = String::from_utf8(body).map_err(|_| FeedError::Encoding)?;
    Ok(strip_gopher_terminator(&text))
}

async fn read_file(path: &Path) -> Result<String, FeedError> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() as usize > MAX_FEED_BYTES {
        return Err(FeedError::TooLarge);
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

fn strip_gopher_terminator(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim_end_matches('\r').is_empty()) {
        lines.pop();
    }
    if lines.last().is_some_and(|l| l.trim_end_matches('\r') == ".") {
        lines.pop();
    }
    lines.join("\n")
}

/// Watch `path` and send a unit on `tx` whenever it is created, modified or removed.
///
/// The parent directory is watched so editors that replace the file are seen.
/// The returned watcher must be kept alive.
pub fn watch_file(path: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher, FeedError> {
    let target = path.to_path_buf();
    let file_name = target.file_name().map(|n| n.to_os_string());
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove();
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant && ours {
                    // A pending signal already covers this change.
                    let _ = tx.try_send(());
                }
            }
            Err(e) => tracing::error!(error = ?e, "Override file watch error"),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = ?target, "Blocklist override watcher started");
    Ok(watcher)
}
