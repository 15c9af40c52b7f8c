//! Admission gate: the first check every accepted connection passes.
//!
//! # Data Flow
//! ```text
//! ConnectionContext
//!     → client key (peer IP, or the shared Tor bucket)
//!     → banned?        → Banned(retry_after)
//!     → blocklisted?   → Blocklisted        (clearnet only)
//!     → rate limiter   → RateLimited(retry_after) | Banned | admitted
//! ```
//!
//! # Design Decisions
//! - Fail closed: a clearnet peer without a known address is denied
//! - Each step is one lock-free or shard-locked operation; no connection-wide lock
//! - Runs before the dispatcher reads any request bytes

use std::sync::Arc;

use crate::error::ClientError;
use crate::net::connection::{ConnectionContext, NetworkClass};
use crate::observability::metrics;
use crate::security::blocklist::Blocklist;
use crate::security::rate_limit::{ClientKey, RateDecision, RateLimiter};

/// Composes ban check, blocklist and rate limiter.
#[derive(Clone)]
pub struct AdmissionGate {
    blocklist: Arc<Blocklist>,
    limiter: Arc<RateLimiter>,
}

impl AdmissionGate {
    pub fn new(blocklist: Arc<Blocklist>, limiter: Arc<RateLimiter>) -> Self {
        Self { blocklist, limiter }
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Admit or reject one connection. On success returns the rate-limit key.
    pub fn admit(&self, ctx: &ConnectionContext) -> Result<ClientKey, ClientError> {
        let result = self.evaluate(ctx);
        if let Err(err) = &result {
            metrics::record_admission_rejected(err.label());
            tracing::info!(
                connection_id = %ctx.id,
                peer = %ctx.peer_label(),
                protocol = %ctx.protocol,
                reason = err.label(),
                "Connection rejected at admission"
            );
        }
        result
    }

    fn evaluate(&self, ctx: &ConnectionContext) -> Result<ClientKey, ClientError> {
        let key = match (ctx.network, ctx.remote) {
            (NetworkClass::Tor, _) => ClientKey::Tor,
            (NetworkClass::Clearnet, Some(addr)) => ClientKey::Ip(addr.ip().to_canonical()),
            (NetworkClass::Clearnet, None) => return Err(ClientError::Internal),
        };

        if let Some(remaining) = self.limiter.ban_remaining(key) {
            return Err(ClientError::Banned { retry_after: remaining });
        }

        if let ClientKey::Ip(ip) = key {
            if self.blocklist.is_blocked(ip) {
                return Err(ClientError::Blocklisted);
            }
        }

        match self.limiter.check(key) {
            RateDecision::Allowed => Ok(key),
            RateDecision::Limited { retry_after } => Err(ClientError::RateLimited { retry_after }),
            RateDecision::Banned { retry_after } => Err(ClientError::Banned { retry_after }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlocklistConfig, RateLimitConfig};
    use crate::net::connection::ConnectionId;
    use crate::protocol::Protocol;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn gate() -> AdmissionGate {
        let blocklist = Arc::new(Blocklist::new(BlocklistConfig::default()).unwrap());
        blocklist.load_source("test", "203.0.113.0/24\n");
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        AdmissionGate::new(blocklist, limiter)
    }

    fn ctx(addr: &str, network: NetworkClass) -> ConnectionContext {
        let remote: SocketAddr = addr.parse().unwrap();
        ConnectionContext::new(ConnectionId::new(), Some(remote), network, Protocol::Gopher)
    }

    #[test]
    fn admits_clean_peers() {
        let gate = gate();
        let key = gate.admit(&ctx("198.51.100.1:5000", NetworkClass::Clearnet)).unwrap();
        assert_eq!(key, ClientKey::Ip("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn rejects_blocklisted_networks() {
        let gate = gate();
        assert_eq!(
            gate.admit(&ctx("203.0.113.50:5000", NetworkClass::Clearnet)),
            Err(ClientError::Blocklisted)
        );
        // Blocklist rejections do not consume rate-limit budget.
        assert_eq!(gate.limiter().stats().allowed_total, 0);
    }

    #[test]
    fn ban_is_checked_before_blocklist() {
        let gate = gate();
        gate.limiter().ban(
            ClientKey::Ip("203.0.113.50".parse().unwrap()),
            Duration::from_secs(60),
        );
        assert!(matches!(
            gate.admit(&ctx("203.0.113.50:5000", NetworkClass::Clearnet)),
            Err(ClientError::Banned { .. })
        ));
    }

    #[test]
    fn tor_skips_blocklist_and_shares_a_key() {
        let gate = gate();
        let key = gate.admit(&ctx("127.0.0.1:9050", NetworkClass::Tor)).unwrap();
        assert_eq!(key, ClientKey::Tor);
        gate.blocklist().load_source("loopback", "127.0.0.0/8\n");
        assert!(gate.admit(&ctx("127.0.0.1:9051", NetworkClass::Tor)).is_ok());
    }

    #[test]
    fn unknown_peer_fails_closed() {
        let gate = gate();
        let ctx = ConnectionContext::new(
            ConnectionId::new(),
            None,
            NetworkClass::Clearnet,
            Protocol::Finger,
        );
        assert_eq!(gate.admit(&ctx), Err(ClientError::Internal));
    }
}
