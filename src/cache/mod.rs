//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Stateless generation request (no prior turns)
//!     → fingerprint.rs (SHA-256 over normalized query + model + persona)
//!     → store.rs get → hit: replay payload | miss: generate
//!     → store.rs put (successful generations only)
//! ```
//!
//! # Design Decisions
//! - Conversational context never reaches the fingerprint; requests carrying
//!   it are not eligible at all
//! - Payloads are stored unredacted and pass the output filter on every replay
//! - TTL is checked on access and by a periodic sweep

pub mod fingerprint;
pub mod store;

pub use fingerprint::{normalize_query, Fingerprint};
pub use store::{CacheStats, ResponseCache};
