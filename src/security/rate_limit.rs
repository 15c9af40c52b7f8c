//! Per-client sliding-window rate limiting with burst detection and auto-ban.
//!
//! # Responsibilities
//! - Count requests per client within a trailing window
//! - Flag bursts inside a short sub-window as violations
//! - Ban clients whose live violations reach the threshold
//! - Periodically evict idle records to bound memory
//!
//! # Design Decisions
//! - One `DashMap` entry per client; every check is a single shard-locked
//!   update, so a slow client never holds a lock another client needs
//! - Timestamps are kept exactly (`VecDeque<Instant>`), so the visible count
//!   is always the number of requests strictly inside the window
//! - A burst records one violation per episode; the request itself is still
//!   judged by the main window
//! - Denied requests are not added to the window
//!
//! # Data Flow
//! ```text
//! check(key)
//!     → banned?                  → Banned(remaining)
//!     → purge expired timestamps
//!     → burst sub-window full?   → record violation (once per episode)
//!     → window full?             → record violation → Limited(retry_after)
//!     → push timestamp           → Allowed
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

const MIN_RETRY: Duration = Duration::from_secs(1);

/// Identity a rate-limit record is kept under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Ip(IpAddr),
    /// All onion-service traffic shares one bucket.
    Tor,
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        ClientKey::Ip(ip)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Ip(ip) => write!(f, "{ip}"),
            ClientKey::Tor => f.write_str("tor"),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
    Banned { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tracked: usize,
    pub banned: usize,
    pub allowed_total: u64,
    pub limited_total: u64,
    pub banned_total: u64,
    pub violations_total: u64,
}

#[derive(Debug)]
struct RateRecord {
    window: VecDeque<Instant>,
    violations: VecDeque<Instant>,
    banned_until: Option<Instant>,
    burst_flagged_at: Option<Instant>,
    last_seen: Instant,
}

impl RateRecord {
    fn new(now: Instant) -> Self {
        Self {
            window: VecDeque::new(),
            violations: VecDeque::new(),
            banned_until: None,
            burst_flagged_at: None,
            last_seen: now,
        }
    }

    fn ban_remaining(&mut self, now: Instant) -> Option<Duration> {
        match self.banned_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                self.banned_until = None;
                None
            }
            None => None,
        }
    }

    fn purge(&mut self, now: Instant, window: Duration, violation_ttl: Duration) {
        if let Some(cutoff) = now.checked_sub(window) {
            while self.window.front().is_some_and(|&t| t <= cutoff) {
                self.window.pop_front();
            }
        }
        if let Some(cutoff) = now.checked_sub(violation_ttl) {
            while self.violations.front().is_some_and(|&t| t <= cutoff) {
                self.violations.pop_front();
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.window.is_empty()
            && self.violations.is_empty()
            && self.banned_until.map_or(true, |until| until <= now)
    }
}

/// Concurrent per-client rate limiter.
pub struct RateLimiter {
    records: DashMap<ClientKey, RateRecord>,
    config: RateLimitConfig,
    allowed_total: AtomicU64,
    limited_total: AtomicU64,
    banned_total: AtomicU64,
    violations_total: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
            allowed_total: AtomicU64::new(0),
            limited_total: AtomicU64::new(0),
            banned_total: AtomicU64::new(0),
            violations_total: AtomicU64::new(0),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    fn burst_window(&self) -> Duration {
        Duration::from_secs(self.config.burst_window_secs)
    }

    fn violation_ttl(&self) -> Duration {
        Duration::from_secs(self.config.violation_ttl_secs)
    }

    /// Check and record one request.
    pub fn check(&self, key: ClientKey) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// [`Self::check`] against an explicit clock.
    pub fn check_at(&self, key: ClientKey, now: Instant) -> RateDecision {
        let mut record = self.records.entry(key).or_insert_with(|| RateRecord::new(now));
        record.last_seen = now;

        if let Some(remaining) = record.ban_remaining(now) {
            self.banned_total.fetch_add(1, Ordering::Relaxed);
            return RateDecision::Banned {
                retry_after: remaining.max(MIN_RETRY),
            };
        }

        if !self.config.enabled {
            self.allowed_total.fetch_add(1, Ordering::Relaxed);
            return RateDecision::Allowed;
        }

        record.purge(now, self.window(), self.violation_ttl());

        let burst_window = self.burst_window();
        let in_burst = match now.checked_sub(burst_window) {
            Some(cutoff) => record.window.iter().rev().take_while(|&&t| t > cutoff).count(),
            None => record.window.len(),
        };
        if in_burst >= self.config.burst_limit as usize {
            let new_episode = record
                .burst_flagged_at
                .map_or(true, |flagged| now.saturating_duration_since(flagged) >= burst_window);
            if new_episode {
                record.burst_flagged_at = Some(now);
                tracing::warn!(client = %key, in_burst, "Burst detected");
                if let Some(ban) = self.add_violation(&mut record, key, now) {
                    return ban;
                }
            }
        }

        if record.window.len() >= self.config.max_requests as usize {
            let retry_after = record
                .window
                .front()
                .map(|&oldest| (oldest + self.window()).saturating_duration_since(now))
                .unwrap_or(MIN_RETRY)
                .max(MIN_RETRY);
            if let Some(ban) = self.add_violation(&mut record, key, now) {
                return ban;
            }
            self.limited_total.fetch_add(1, Ordering::Relaxed);
            return RateDecision::Limited { retry_after };
        }

        record.window.push_back(now);
        self.allowed_total.fetch_add(1, Ordering::Relaxed);
        RateDecision::Allowed
    }

    /// Record a violation outside of `check`. Returns true if it caused a ban.
    pub fn record_violation(&self, key: ClientKey) -> bool {
        self.record_violation_at(key, Instant::now())
    }

    pub fn record_violation_at(&self, key: ClientKey, now: Instant) -> bool {
        let mut record = self.records.entry(key).or_insert_with(|| RateRecord::new(now));
        record.last_seen = now;
        if record.ban_remaining(now).is_some() {
            return true;
        }
        record.purge(now, self.window(), self.violation_ttl());
        self.add_violation(&mut record, key, now).is_some()
    }

    fn add_violation(
        &self,
        record: &mut RateRecord,
        key: ClientKey,
        now: Instant,
    ) -> Option<RateDecision> {
        record.violations.push_back(now);
        self.violations_total.fetch_add(1, Ordering::Relaxed);
        let count = record.violations.len();
        tracing::debug!(client = %key, violations = count, "Rate violation recorded");

        if count < self.config.ban_threshold as usize {
            return None;
        }
        let duration = Duration::from_secs(self.config.ban_secs);
        record.banned_until = Some(now + duration);
        record.violations.clear();
        record.window.clear();
        self.banned_total.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            client = %key,
            violations = count,
            ban_secs = self.config.ban_secs,
            "Client auto-banned"
        );
        Some(RateDecision::Banned {
            retry_after: duration.max(MIN_RETRY),
        })
    }

    /// Ban a client for `duration`, replacing any existing ban.
    pub fn ban(&self, key: ClientKey, duration: Duration) {
        let now = Instant::now();
        let mut record = self.records.entry(key).or_insert_with(|| RateRecord::new(now));
        record.banned_until = Some(now + duration);
        tracing::info!(client = %key, secs = duration.as_secs(), "Client banned");
    }

    /// Lift a ban and forget the client's violations. Returns true if a ban was active.
    pub fn unban(&self, key: ClientKey) -> bool {
        let now = Instant::now();
        match self.records.get_mut(&key) {
            Some(mut record) => {
                let was_banned = record.ban_remaining(now).is_some();
                record.banned_until = None;
                record.violations.clear();
                record.burst_flagged_at = None;
                if was_banned {
                    tracing::info!(client = %key, "Client unbanned");
                }
                was_banned
            }
            None => false,
        }
    }

    /// Remaining ban time, if the client is banned.
    pub fn ban_remaining(&self, key: ClientKey) -> Option<Duration> {
        self.ban_remaining_at(key, Instant::now())
    }

    pub fn ban_remaining_at(&self, key: ClientKey, now: Instant) -> Option<Duration> {
        let record = self.records.get(&key)?;
        match record.banned_until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    /// Active bans with their remaining time.
    pub fn bans(&self) -> Vec<(ClientKey, Duration)> {
        let now = Instant::now();
        self.records
            .iter()
            .filter_map(|entry| match entry.banned_until {
                Some(until) if until > now => Some((*entry.key(), until - now)),
                _ => None,
            })
            .collect()
    }

    /// Remove idle records. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let window = self.window();
        let ttl = self.violation_ttl();
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.purge(now, window, ttl);
            !record.is_idle(now)
        });
        let after = self.records.len();
        metrics::record_rate_limiter_tracked(after);
        before.saturating_sub(after)
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let banned = self
            .records
            .iter()
            .filter(|entry| entry.banned_until.is_some_and(|until| until > now))
            .count();
        RateLimiterStats {
            tracked: self.records.len(),
            banned,
            allowed_total: self.allowed_total.load(Ordering::Relaxed),
            limited_total: self.limited_total.load(Ordering::Relaxed),
            banned_total: self.banned_total.load(Ordering::Relaxed),
            violations_total: self.violations_total.load(Ordering::Relaxed),
        }
    }

    /// Periodic cleanup until shutdown.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.cleanup();
                    if removed > 0 {
                        tracing::debug!(removed, tracked = self.records.len(), "Rate limiter cleanup");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limiter cleanup received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> ClientKey {
        ClientKey::Ip(IpAddr::from([198, 51, 100, n]))
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn denies_request_past_limit_within_window() {
        let limiter = limiter();
        let start = Instant::now();
        // Spread 60 requests across 59s so the burst detector stays quiet.
        for i in 0..60 {
            let at = start + Duration::from_millis(i * 983);
            assert_eq!(limiter.check_at(key(1), at), RateDecision::Allowed, "request {i}");
        }
        let at = start + Duration::from_secs(59);
        match limiter.check_at(key(1), at) {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after >= Duration::from_secs(1));
            }
            other => panic!("expected limited, got {other:?}"),
        }
    }

    #[test]
    fn window_slides() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..60 {
            limiter.check_at(key(2), start + Duration::from_millis(i * 900));
        }
        assert!(!limiter.check_at(key(2), start + Duration::from_secs(55)).is_allowed());
        // The first timestamp leaves the window after 60s.
        assert!(limiter
            .check_at(key(2), start + Duration::from_millis(60_001))
            .is_allowed());
    }

    #[test]
    fn rapid_burst_counts_one_violation_and_main_window_denies() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..60 {
            assert!(limiter
                .check_at(key(3), start + Duration::from_millis(i * 10))
                .is_allowed());
        }
        let denied = limiter.check_at(key(3), start + Duration::from_millis(600));
        assert!(matches!(denied, RateDecision::Limited { .. }));
        // One burst episode plus one window denial.
        assert_eq!(limiter.stats().violations_total, 2);
    }

    #[test]
    fn threshold_violations_ban() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..4 {
            assert!(!limiter.record_violation_at(key(4), now));
        }
        assert!(limiter.record_violation_at(key(4), now));
        assert!(matches!(
            limiter.check_at(key(4), now + Duration::from_secs(1)),
            RateDecision::Banned { .. }
        ));
    }

    #[test]
    fn expired_violations_do_not_count() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..4 {
            limiter.record_violation_at(key(5), now);
        }
        let later = now + Duration::from_secs(3601);
        assert!(!limiter.record_violation_at(key(5), later));
        assert!(limiter.check_at(key(5), later).is_allowed());
    }

    #[test]
    fn ban_holds_until_expiry() {
        let limiter = limiter();
        limiter.ban(key(6), Duration::from_secs(30));
        let now = Instant::now();
        assert!(matches!(
            limiter.check_at(key(6), now + Duration::from_secs(29)),
            RateDecision::Banned { .. }
        ));
        assert!(limiter.check_at(key(6), now + Duration::from_secs(31)).is_allowed());
    }

    #[test]
    fn unban_lifts_immediately() {
        let limiter = limiter();
        limiter.ban(key(7), Duration::from_secs(3600));
        assert!(limiter.ban_remaining(key(7)).is_some());
        assert!(limiter.unban(key(7)));
        assert!(limiter.check(key(7)).is_allowed());
        assert!(!limiter.unban(key(7)));
    }

    #[test]
    fn disabled_limiter_still_honors_bans() {
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config);
        let now = Instant::now();
        for _ in 0..200 {
            assert!(limiter.check_at(key(8), now).is_allowed());
        }
        limiter.ban(key(8), Duration::from_secs(60));
        assert!(!limiter.check(key(8)).is_allowed());
    }

    #[test]
    fn cleanup_removes_idle_records() {
        let limiter = limiter();
        let now = Instant::now();
        limiter.check_at(key(9), now);
        limiter.check_at(key(10), now);
        limiter.ban(key(11), Duration::from_secs(7200));

        let removed = limiter.cleanup_at(now + Duration::from_secs(61));
        assert_eq!(removed, 2);
        assert_eq!(limiter.stats().tracked, 1);
        assert_eq!(limiter.stats().banned, 1);
    }

    #[test]
    fn tor_clients_share_a_bucket() {
        let config = RateLimitConfig {
            max_requests: 2,
            burst_limit: 2,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config);
        let now = Instant::now();
        assert!(limiter.check_at(ClientKey::Tor, now).is_allowed());
        assert!(limiter.check_at(ClientKey::Tor, now).is_allowed());
        assert!(!limiter.check_at(ClientKey::Tor, now).is_allowed());
        assert!(limiter.check_at(key(12), now).is_allowed());
    }
}
