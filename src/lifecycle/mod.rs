//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_shutdown resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loops and background tasks exit
//!             → drain open sessions (bounded by the grace period) → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, drain, close
//! - Shutdown has a deadline: sessions still open after the grace period are dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{wait_for_shutdown, ShutdownSignal};
