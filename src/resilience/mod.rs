//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Fetch from an external source:
//!     → retries.rs (bounded attempts)
//!     → backoff.rs (doubling delay with equal jitter)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline set by the caller
//! - Jittered backoff prevents thundering herd against feed hosts
//! - Retries are bounded; the caller decides what a final failure means

pub mod backoff;
pub mod retries;

pub use backoff::RetryPolicy;
pub use retries::retry_with_backoff;
