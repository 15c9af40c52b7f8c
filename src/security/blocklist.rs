//! IP blocklist with exact and CIDR matching.
//!
//! # Responsibilities
//! - Answer `is_blocked(ip)` on every accepted connection
//! - Rebuild the lookup index from remote feeds and the local override file
//! - Keep each source's last good snapshot when its fetch fails
//!
//! # Design Decisions
//! - The index is immutable and published through `ArcSwap`; readers load a
//!   complete snapshot, never a partially built one
//! - Exact entries live in a `HashSet`; networks are bucketed by prefix
//!   length as sorted integer vectors, so a lookup masks the address once per
//!   prefix length and binary-searches (no allocation)
//! - `/32` and `/128` networks are stored as exact entries
//! - IPv4 and IPv6 are matched independently; IPv4-mapped IPv6 peers are
//!   canonicalized to IPv4 first
//!
//! # Data Flow
//! ```text
//! refresh()
//!     → for each source: fetch (retry + backoff) → parse_feed → snapshot
//!         (failure: keep previous snapshot, log, count)
//!     → override file (always last)
//!     → merge snapshots → BlocklistIndex → ArcSwap::store
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::config::BlocklistConfig;
use crate::observability::metrics;
use crate::resilience::{retry_with_backoff, RetryPolicy};
use crate::security::feed::{self, FeedError, FeedSource};

/// Source name used for the local override file.
pub const OVERRIDE_SOURCE: &str = "override";

/// Errors surfaced by blocklist refresh.
#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("{failed} of {total} blocklist sources failed; previous snapshots retained")]
    PartialFailure { failed: usize, total: usize },
}

/// A denied network. Host bits are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    V4 { addr: u32, prefix: u8 },
    V6 { addr: u128, prefix: u8 },
}

impl Network {
    /// Parse `ip` or `ip/prefix`, zeroing host bits.
    pub fn parse(text: &str) -> Option<Self> {
        let (addr, prefix) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
            None => (text, None),
        };
        match addr.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => {
                let prefix = prefix.unwrap_or(32);
                (prefix <= 32).then(|| Network::V4 {
                    addr: u32::from(v4) & mask_v4(prefix),
                    prefix,
                })
            }
            IpAddr::V6(v6) => {
                let prefix = prefix.unwrap_or(128);
                (prefix <= 128).then(|| Network::V6 {
                    addr: u128::from(v6) & mask_v6(prefix),
                    prefix,
                })
            }
        }
    }

    /// The single address this network denotes, if it is a host route.
    pub fn as_host(&self) -> Option<IpAddr> {
        match *self {
            Network::V4 { addr, prefix: 32 } => Some(IpAddr::V4(Ipv4Addr::from(addr))),
            Network::V6 { addr, prefix: 128 } => Some(IpAddr::V6(Ipv6Addr::from(addr))),
            _ => None,
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (*self, ip.to_canonical()) {
            (Network::V4 { addr, prefix }, IpAddr::V4(v4)) => u32::from(v4) & mask_v4(prefix) == addr,
            (Network::V6 { addr, prefix }, IpAddr::V6(v6)) => u128::from(v6) & mask_v6(prefix) == addr,
            _ => false,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Network::V4 { addr, prefix } => write!(f, "{}/{}", Ipv4Addr::from(addr), prefix),
            Network::V6 { addr, prefix } => write!(f, "{}/{}", Ipv6Addr::from(addr), prefix),
        }
    }
}

fn mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// Result of parsing one feed body.
#[derive(Debug, Default, Clone)]
pub struct ParsedFeed {
    pub entries: Vec<Network>,
    pub skipped: usize,
}

/// Parse a feed: one IP or CIDR per line, `#` or `;` starts a comment.
///
/// Malformed lines are skipped and counted.
pub fn parse_feed(text: &str) -> ParsedFeed {
    let mut parsed = ParsedFeed::default();
    for line in text.lines() {
        let content = line.split(['#', ';']).next().unwrap_or("").trim();
        let Some(token) = content.split_whitespace().next() else {
            continue;
        };
        match Network::parse(token) {
            Some(net) => parsed.entries.push(net),
            None => parsed.skipped += 1,
        }
    }
    parsed
}

/// Immutable lookup structure published to readers.
#[derive(Debug, Default)]
pub struct BlocklistIndex {
    exact: HashSet<IpAddr>,
    v4: Vec<(u8, Vec<u32>)>,
    v6: Vec<(u8, Vec<u128>)>,
}

impl BlocklistIndex {
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a Network>) -> Self {
        let mut exact = HashSet::new();
        let mut v4: HashMap<u8, Vec<u32>> = HashMap::new();
        let mut v6: HashMap<u8, Vec<u128>> = HashMap::new();

        for net in entries {
            if let Some(host) = net.as_host() {
                exact.insert(host);
                continue;
            }
            match *net {
                Network::V4 { addr, prefix } => v4.entry(prefix).or_default().push(addr),
                Network::V6 { addr, prefix } => v6.entry(prefix).or_default().push(addr),
            }
        }

        Self {
            exact,
            v4: sorted_buckets(v4),
            v6: sorted_buckets(v6),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if self.exact.contains(&ip) {
            return true;
        }
        match ip {
            IpAddr::V4(v4) => {
                let raw = u32::from(v4);
                self.v4
                    .iter()
                    .any(|(prefix, nets)| nets.binary_search(&(raw & mask_v4(*prefix))).is_ok())
            }
            IpAddr::V6(v6) => {
                let raw = u128::from(v6);
                self.v6
                    .iter()
                    .any(|(prefix, nets)| nets.binary_search(&(raw & mask_v6(*prefix))).is_ok())
            }
        }
    }

    pub fn exact_count(&self) -> usize {
        self.exact.len()
    }

    pub fn cidr_count(&self) -> usize {
        self.v4.iter().map(|(_, n)| n.len()).sum::<usize>()
            + self.v6.iter().map(|(_, n)| n.len()).sum::<usize>()
    }
}

fn sorted_buckets<T: Ord>(buckets: HashMap<u8, Vec<T>>) -> Vec<(u8, Vec<T>)> {
    let mut out: Vec<(u8, Vec<T>)> = buckets
        .into_iter()
        .map(|(prefix, mut nets)| {
            nets.sort_unstable();
            nets.dedup();
            (prefix, nets)
        })
        .collect();
    // Shorter prefixes cover more addresses; check them first.
    out.sort_unstable_by_key(|(prefix, _)| *prefix);
    out
}

/// Last good data from one source.
#[derive(Debug, Clone)]
struct SourceSnapshot {
    entries: Vec<Network>,
    skipped: usize,
    ingested_at: SystemTime,
    last_error: Option<String>,
}

/// Per-source statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub name: String,
    pub entries: usize,
    pub skipped: usize,
    pub ingested_at: Option<u64>,
    pub last_error: Option<String>,
}

/// Blocklist statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BlocklistStats {
    pub exact_count: usize,
    pub cidr_count: usize,
    /// Unix seconds of the last completed refresh.
    pub last_refresh: Option<u64>,
    pub sources: Vec<SourceStats>,
}

/// Summary of one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// The shared blocklist.
pub struct Blocklist {
    index: ArcSwap<BlocklistIndex>,
    snapshots: Mutex<HashMap<String, SourceSnapshot>>,
    last_refresh: Mutex<Option<SystemTime>>,
    refresh_lock: tokio::sync::Mutex<()>,
    config: BlocklistConfig,
    client: reqwest::Client,
}

impl Blocklist {
    pub fn new(config: BlocklistConfig) -> Result<Self, BlocklistError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(concat!("burrow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FeedError::from)?;
        Ok(Self {
            index: ArcSwap::from_pointee(BlocklistIndex::default()),
            snapshots: Mutex::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            config,
            client,
        })
    }

    /// Whether `ip` equals a blocked address or falls inside a blocked network.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.index.load().contains(ip)
    }

    /// Replace one source's entries from feed text and republish the index.
    pub fn load_source(&self, name: &str, text: &str) -> ParsedFeed {
        let parsed = self.store_snapshot(name, text);
        self.rebuild();
        parsed
    }

    /// Fetch every source and the override file, then swap in the new index.
    ///
    /// Failed sources keep their previous snapshot. The index is swapped even
    /// when some sources fail; the error reports how many did.
    pub async fn refresh(&self) -> Result<RefreshReport, BlocklistError> {
        let _guard = self.refresh_lock.lock().await;
        let mut report = RefreshReport::default();

        for source in &self.config.sources {
            match self.fetch_source(source).await {
                Ok(text) => {
                    let parsed = self.store_snapshot(source, &text);
                    tracing::info!(
                        source = %source,
                        entries = parsed.entries.len(),
                        skipped = parsed.skipped,
                        "Blocklist source refreshed"
                    );
                    metrics::record_blocklist_refresh(source, "ok");
                    report.refreshed.push(source.clone());
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Blocklist source failed, keeping previous snapshot");
                    self.record_failure(source, &e);
                    metrics::record_blocklist_refresh(source, "error");
                    report.failed.push(source.clone());
                }
            }
        }

        if let Some(path) = &self.config.override_file {
            match read_override(path).await {
                Ok(text) => {
                    let parsed = self.store_snapshot(OVERRIDE_SOURCE, &text);
                    tracing::debug!(entries = parsed.entries.len(), "Blocklist override loaded");
                    report.refreshed.push(OVERRIDE_SOURCE.to_string());
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Blocklist override unreadable, keeping previous snapshot");
                    self.record_failure(OVERRIDE_SOURCE, &e);
                    report.failed.push(OVERRIDE_SOURCE.to_string());
                }
            }
        }

        self.rebuild();
        *self.last_refresh.lock() = Some(SystemTime::now());

        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(BlocklistError::PartialFailure {
                failed: report.failed.len(),
                total: report.failed.len() + report.refreshed.len(),
            })
        }
    }

    async fn fetch_source(&self, source: &str) -> Result<String, FeedError> {
        let feed = FeedSource::parse(source)?;
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let policy = RetryPolicy {
            attempts: self.config.fetch_attempts,
            base_delay_ms: self.config.retry_base_delay_ms,
            max_delay_ms: self.config.retry_max_delay_ms,
        };
        retry_with_backoff(source, policy, || feed.fetch(&self.client, timeout)).await
    }

    fn store_snapshot(&self, name: &str, text: &str) -> ParsedFeed {
        let parsed = parse_feed(text);
        self.snapshots.lock().insert(
            name.to_string(),
            SourceSnapshot {
                entries: parsed.entries.clone(),
                skipped: parsed.skipped,
                ingested_at: SystemTime::now(),
                last_error: None,
            },
        );
        parsed
    }

    fn record_failure(&self, name: &str, err: &FeedError) {
        let mut snapshots = self.snapshots.lock();
        let snapshot = snapshots.entry(name.to_string()).or_insert_with(|| SourceSnapshot {
            entries: Vec::new(),
            skipped: 0,
            ingested_at: UNIX_EPOCH,
            last_error: None,
        });
        snapshot.last_error = Some(err.to_string());
    }

    fn rebuild(&self) {
        let index = {
            let snapshots = self.snapshots.lock();
            BlocklistIndex::build(snapshots.values().flat_map(|s| s.entries.iter()))
        };
        metrics::record_blocklist_entries(index.exact_count(), index.cidr_count());
        self.index.store(Arc::new(index));
    }

    pub fn stats(&self) -> BlocklistStats {
        let index = self.index.load();
        let mut sources: Vec<SourceStats> = self
            .snapshots
            .lock()
            .iter()
            .map(|(name, s)| SourceStats {
                name: name.clone(),
                entries: s.entries.len(),
                skipped: s.skipped,
                ingested_at: unix_secs(s.ingested_at).filter(|&secs| secs > 0),
                last_error: s.last_error.clone(),
            })
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));

        BlocklistStats {
            exact_count: index.exact_count(),
            cidr_count: index.cidr_count(),
            last_refresh: self.last_refresh.lock().and_then(unix_secs),
            sources,
        }
    }

    /// Refresh on a fixed interval and whenever the override file changes.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Blocklist disabled");
            return;
        }

        let (change_tx, mut change_rx) = mpsc::channel(1);
        let _watcher = match &self.config.override_file {
            Some(path) => match feed::watch_file(&PathBuf::from(path), change_tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Override file watch unavailable, interval refresh only");
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            sources = self.config.sources.len(),
            interval_secs = self.config.refresh_interval_secs,
            "Blocklist refresher starting"
        );

        let interval = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_logged("interval").await;
                }
                Some(()) = change_rx.recv() => {
                    self.refresh_logged("override_changed").await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Blocklist refresher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn refresh_logged(&self, trigger: &str) {
        match self.refresh().await {
            Ok(report) => {
                let stats = self.stats();
                tracing::info!(
                    trigger,
                    sources = report.refreshed.len(),
                    exact = stats.exact_count,
                    cidr = stats.cidr_count,
                    "Blocklist refreshed"
                );
            }
            Err(e) => tracing::warn!(trigger, error = %e, "Blocklist refresh incomplete"),
        }
    }
}

async fn read_override(path: &str) -> Result<String, FeedError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        // A missing override file means no overrides.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

fn unix_secs(at: SystemTime) -> Option<u64> {
    at.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn blocklist(text: &str) -> Blocklist {
        let list = Blocklist::new(BlocklistConfig::default()).unwrap();
        list.load_source("test", text);
        list
    }

    #[test]
    fn parses_entries_and_skips_garbage() {
        let parsed = parse_feed(
            "# comment\n\n192.0.2.1\n203.0.113.0/24 ; drop list\n2001:db8::/32\nnot-an-ip\n10.0.0.0/33\n",
        );
        assert_eq!(parsed.entries.len(), 3);
        assert_eq!(parsed.skipped, 2);
    }

    #[test]
    fn normalizes_host_bits() {
        assert_eq!(
            Network::parse("203.0.113.77/24"),
            Network::parse("203.0.113.0/24")
        );
        assert_eq!(Network::parse("203.0.113.77/24").unwrap().to_string(), "203.0.113.0/24");
    }

    #[test]
    fn exact_matches() {
        let list = blocklist("192.0.2.1\n2001:db8::1\n");
        assert!(list.is_blocked(ip("192.0.2.1")));
        assert!(!list.is_blocked(ip("192.0.2.2")));
        assert!(list.is_blocked(ip("2001:db8::1")));
        assert_eq!(list.stats().exact_count, 2);
        assert_eq!(list.stats().cidr_count, 0);
    }

    #[test]
    fn cidr_boundaries() {
        let list = blocklist("203.0.113.0/24\n");
        assert!(list.is_blocked(ip("203.0.113.0")));
        assert!(list.is_blocked(ip("203.0.113.255")));
        assert!(!list.is_blocked(ip("203.0.112.255")));
        assert!(!list.is_blocked(ip("203.0.114.0")));
    }

    #[test]
    fn every_address_in_small_network_is_blocked() {
        let list = blocklist("198.51.100.64/28\n");
        for last in 64..80u8 {
            assert!(list.is_blocked(IpAddr::from([198, 51, 100, last])));
        }
        assert!(!list.is_blocked(ip("198.51.100.63")));
        assert!(!list.is_blocked(ip("198.51.100.80")));
    }

    #[test]
    fn ipv6_networks() {
        let list = blocklist("2001:db8:abcd::/48\n");
        assert!(list.is_blocked(ip("2001:db8:abcd:1::5")));
        assert!(!list.is_blocked(ip("2001:db8:abce::1")));
    }

    #[test]
    fn families_are_independent() {
        let list = blocklist("0.0.0.0/0\n");
        assert!(list.is_blocked(ip("8.8.8.8")));
        assert!(!list.is_blocked(ip("2001:db8::1")));
    }

    #[test]
    fn mapped_ipv6_peers_match_ipv4_entries() {
        let list = blocklist("203.0.113.0/24\n");
        assert!(list.is_blocked(ip("::ffff:203.0.113.9")));
    }

    #[test]
    fn host_routes_become_exact() {
        let list = blocklist("192.0.2.7/32\n2001:db8::7/128\n");
        assert_eq!(list.stats().exact_count, 2);
        assert!(list.is_blocked(ip("192.0.2.7")));
    }

    #[tokio::test]
    async fn refresh_keeps_previous_snapshot_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.txt");
        std::fs::write(&path, "203.0.113.0/24\n").unwrap();
        let source = format!("file://{}", path.display());

        let config = BlocklistConfig {
            sources: vec![source],
            fetch_attempts: 1,
            ..BlocklistConfig::default()
        };
        let list = Blocklist::new(config).unwrap();
        list.refresh().await.unwrap();
        assert!(list.is_blocked(ip("203.0.113.5")));

        std::fs::remove_file(&path).unwrap();
        let err = list.refresh().await.unwrap_err();
        assert!(matches!(err, BlocklistError::PartialFailure { failed: 1, total: 1 }));
        assert!(list.is_blocked(ip("203.0.113.5")));
        assert!(list.stats().sources[0].last_error.is_some());
    }

    #[tokio::test]
    async fn override_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.txt");
        std::fs::write(&path, "# local\n192.0.2.99\n").unwrap();

        let config = BlocklistConfig {
            override_file: Some(path.display().to_string()),
            ..BlocklistConfig::default()
        };
        let list = Blocklist::new(config).unwrap();
        list.refresh().await.unwrap();
        assert!(list.is_blocked(ip("192.0.2.99")));
        assert!(list.stats().last_refresh.is_some());
    }
}
