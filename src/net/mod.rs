//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, tracking, ConnectionContext)
//!     → Hand off to server::session
//!
//! Connection States:
//!     Accepting → Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Network class comes from listener configuration, never from the peer

pub mod connection;
pub mod listener;

pub use connection::{ConnectionContext, ConnectionGuard, ConnectionId, ConnectionTracker, NetworkClass};
pub use listener::{ConnectionPermit, Listener, ListenerError};
