//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits consistent)
//! - Check referential integrity (default persona exists)
//! - Reject unusable addresses and source URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ServerConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is out of range: {detail}")]
    OutOfRange { field: &'static str, detail: String },

    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("duplicate listener address '{0}'")]
    DuplicateListener(String),

    #[error("unsupported blocklist source '{0}'")]
    BlocklistSource(String),

    #[error("duplicate persona '{0}'")]
    DuplicatePersona(String),

    #[error("default persona '{0}' is not defined")]
    UnknownDefaultPersona(String),

    #[error("admin API enabled with the placeholder api_key")]
    PlaceholderApiKey,
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_listeners(config, &mut errors);
    check_rate_limit(config, &mut errors);
    check_blocklist(config, &mut errors);
    check_cache_and_streaming(config, &mut errors);
    check_personas(config, &mut errors);

    if config.admin.enabled {
        if config.admin.api_key == PLACEHOLDER_API_KEY || config.admin.api_key.is_empty() {
            errors.push(ValidationError::PlaceholderApiKey);
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BindAddress(config.admin.bind_address.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_listeners(config: &ServerConfig, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for listener in &config.listeners {
        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BindAddress(listener.bind_address.clone()));
        }
        if !seen.insert(listener.bind_address.as_str()) {
            errors.push(ValidationError::DuplicateListener(listener.bind_address.clone()));
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::Zero { field: "listeners.max_connections" });
        }
    }
    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.idle_secs" });
    }
    if config.timeouts.generation_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.generation_secs" });
    }
}

fn check_rate_limit(config: &ServerConfig, errors: &mut Vec<ValidationError>) {
    let rl = &config.rate_limit;
    if rl.window_secs == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.window_secs" });
    }
    if rl.max_requests == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.max_requests" });
    }
    if rl.burst_window_secs == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.burst_window_secs" });
    }
    if rl.burst_window_secs > rl.window_secs {
        errors.push(ValidationError::OutOfRange {
            field: "rate_limit.burst_window_secs",
            detail: format!("{} exceeds window_secs {}", rl.burst_window_secs, rl.window_secs),
        });
    }
    if rl.ban_threshold == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.ban_threshold" });
    }
    if rl.cleanup_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.cleanup_interval_secs" });
    }
}

fn check_blocklist(config: &ServerConfig, errors: &mut Vec<ValidationError>) {
    let bl = &config.blocklist;
    if bl.refresh_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "blocklist.refresh_interval_secs" });
    }
    if bl.fetch_attempts == 0 {
        errors.push(ValidationError::Zero { field: "blocklist.fetch_attempts" });
    }
    for source in &bl.sources {
        let supported = url::Url::parse(source)
            .map(|u| matches!(u.scheme(), "http" | "https" | "gopher" | "file"))
            .unwrap_or(false);
        if !supported {
            errors.push(ValidationError::BlocklistSource(source.clone()));
        }
    }
}

fn check_cache_and_streaming(config: &ServerConfig, errors: &mut Vec<ValidationError>) {
    if config.cache.max_entries == 0 {
        errors.push(ValidationError::Zero { field: "cache.max_entries" });
    }
    if config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "cache.sweep_interval_secs" });
    }
    let st = &config.streaming;
    if st.line_width == 0 {
        errors.push(ValidationError::Zero { field: "streaming.line_width" });
    }
    if st.tolerance == 0 {
        errors.push(ValidationError::Zero { field: "streaming.tolerance" });
    }
    if st.max_line_chars < st.line_width + st.tolerance {
        errors.push(ValidationError::OutOfRange {
            field: "streaming.max_line_chars",
            detail: format!(
                "{} is below line_width + tolerance ({})",
                st.max_line_chars,
                st.line_width + st.tolerance
            ),
        });
    }
    let lim = &config.limits;
    if !(0.0..=1.0).contains(&lim.max_special_char_ratio) {
        errors.push(ValidationError::OutOfRange {
            field: "limits.max_special_char_ratio",
            detail: format!("{} is not within 0.0..=1.0", lim.max_special_char_ratio),
        });
    }
    if config.generation.max_concurrent == 0 {
        errors.push(ValidationError::Zero { field: "generation.max_concurrent" });
    }
    if config.generation.queue_capacity == 0 {
        errors.push(ValidationError::Zero { field: "generation.queue_capacity" });
    }
}

fn check_personas(config: &ServerConfig, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for persona in &config.personas {
        if !seen.insert(persona.name.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicatePersona(persona.name.clone()));
        }
    }
    if !config.personas.is_empty() && config.persona(&config.generation.default_persona).is_none() {
        errors.push(ValidationError::UnknownDefaultPersona(
            config.generation.default_persona.clone(),
        ));
    }
}
