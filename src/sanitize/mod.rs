//! Sanitization subsystem.
//!
//! # Data Flow
//! ```text
//! Request query:
//!     → input.rs (normalize, detect injection) → Allow(text) | Block(reason)
//!
//! Generated text:
//!     → output.rs StreamRedactor (redact secrets, private IPs, prompt leaks
//!       on the raw stream, before it is cut into lines)
//!     → escape.rs (protocol framing rules per line, always last)
//! ```
//!
//! # Design Decisions
//! - Both filters are pure; patterns compile once and are shared read-only
//! - The input filter may block, the output filter only rewrites
//! - Escaping is idempotent and applied by the response writer

pub mod escape;
pub mod input;
pub mod output;

pub use input::{BlockReason, InputFilter, Verdict};
pub use output::{OutputFilter, RedactionKind, StreamRedactor};

use crate::config::ServerConfig;

/// Input and output filters built from configuration.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    pub input: InputFilter,
    pub output: OutputFilter,
}

impl Sanitizer {
    pub fn from_config(config: &ServerConfig) -> Self {
        let prompts: Vec<String> = config
            .personas
            .iter()
            .map(|p| p.system_prompt.clone())
            .collect();
        Self {
            input: InputFilter::new(&config.sanitize.extra_block_phrases),
            output: OutputFilter::new(
                config.sanitize.redaction_marker.clone(),
                config.sanitize.redact_private_ips,
                &prompts,
                config.sanitize.min_prompt_fragment_len,
            ),
        }
    }
}
