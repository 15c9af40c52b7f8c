//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection:
//!     → admission.rs (ban → blocklist → rate limit)
//!         → blocklist.rs (exact + CIDR lookup, refreshed from feed.rs sources)
//!         → rate_limit.rs (sliding window, burst detection, auto-ban)
//! Parsed request:
//!     → limits.rs (selector/query length, character composition)
//!     → Pass to dispatch
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod admission;
pub mod blocklist;
pub mod feed;
pub mod limits;
pub mod rate_limit;

pub use admission::AdmissionGate;
pub use blocklist::{Blocklist, BlocklistError, BlocklistStats};
pub use limits::{LimitViolation, RequestLimits};
pub use rate_limit::{ClientKey, RateDecision, RateLimiter, RateLimiterStats};
