//! Streaming subsystem.
//!
//! # Data Flow
//! ```text
//! Generator fragments
//!     → relay.rs (bounded producer/consumer, deadline, slot permit)
//!     → LineSink: output redaction on the raw stream
//!       → formatter.rs (re-chunk into display lines)
//!       → escape, write, flush per line
//! ```

pub mod formatter;
pub mod relay;

pub use formatter::{StreamFormatter, StreamState};
pub use relay::{relay, replay, LineSink, RelaySettings};
