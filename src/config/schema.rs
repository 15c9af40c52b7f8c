//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::connection::NetworkClass;
use crate::protocol::Protocol;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity advertised in Gopher menus and Gemini links.
    pub server: ServerIdentity,

    /// Listener definitions, one per protocol endpoint.
    pub listeners: Vec<ListenerConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Sliding-window rate limiting and auto-ban.
    pub rate_limit: RateLimitConfig,

    /// Address blocklist sources and refresh policy.
    pub blocklist: BlocklistConfig,

    /// Response cache sizing.
    pub cache: CacheConfig,

    /// Hard request limits enforced before dispatch.
    pub limits: LimitsConfig,

    /// Input and output filters.
    pub sanitize: SanitizeConfig,

    /// Line re-chunking of streamed generations.
    pub streaming: StreamingConfig,

    /// Generation backend settings.
    pub generation: GenerationConfig,

    /// System-prompt presets.
    pub personas: Vec<PersonaConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerIdentity::default(),
            listeners: vec![
                ListenerConfig::new(Protocol::Gopher, "0.0.0.0:70"),
                ListenerConfig::new(Protocol::Gemini, "0.0.0.0:1965"),
                ListenerConfig::new(Protocol::Finger, "0.0.0.0:79"),
            ],
            timeouts: TimeoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            blocklist: BlocklistConfig::default(),
            cache: CacheConfig::default(),
            limits: LimitsConfig::default(),
            sanitize: SanitizeConfig::default(),
            streaming: StreamingConfig::default(),
            generation: GenerationConfig::default(),
            personas: vec![PersonaConfig::default()],
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Look up a persona by name (case-insensitive).
    pub fn persona(&self, name: &str) -> Option<&PersonaConfig> {
        self.personas
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// The persona used when a request names none.
    pub fn default_persona(&self) -> Option<&PersonaConfig> {
        self.persona(&self.generation.default_persona)
            .or_else(|| self.personas.first())
    }
}

/// Public identity of the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerIdentity {
    /// Hostname written into Gopher menu items and Gemini URLs.
    pub hostname: String,

    /// Port written into Gopher menu items.
    pub gopher_port: u16,

    /// Free-form text shown on the about page.
    pub description: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            gopher_port: 70,
            description: "An AI text server for small-internet protocols.".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Wire protocol spoken on this listener.
    pub protocol: Protocol,

    /// Bind address (e.g., "0.0.0.0:70").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Network the listener is reachable from.
    #[serde(default)]
    pub network: NetworkClass,
}

impl ListenerConfig {
    pub fn new(protocol: Protocol, bind_address: impl Into<String>) -> Self {
        Self {
            protocol,
            bind_address: bind_address.into(),
            max_connections: default_max_connections(),
            network: NetworkClass::Clearnet,
        }
    }
}

fn default_max_connections() -> usize {
    1_000
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the client to send its request line, in seconds.
    pub idle_secs: u64,

    /// Total time allowed for one generation, in seconds.
    pub generation_secs: u64,

    /// Time allowed for a single socket write, in seconds.
    pub write_secs: u64,

    /// How long shutdown waits for sessions to drain, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 30,
            generation_secs: 120,
            write_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Requests allowed per window.
    pub max_requests: u32,

    /// Burst sub-window length in seconds.
    pub burst_window_secs: u64,

    /// Requests within the burst sub-window that count as a violation.
    pub burst_limit: u32,

    /// How long a violation counts towards the ban threshold, in seconds.
    pub violation_ttl_secs: u64,

    /// Violations that trigger an automatic ban.
    pub ban_threshold: u32,

    /// Automatic ban duration in seconds.
    pub ban_secs: u64,

    /// Interval between sweeps of inactive records, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 60,
            burst_window_secs: 5,
            burst_limit: 20,
            violation_ttl_secs: 3600,
            ban_threshold: 5,
            ban_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

/// Blocklist configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// Enable blocklist checks.
    pub enabled: bool,

    /// Remote feeds (http, https, gopher or file URLs).
    pub sources: Vec<String>,

    /// Local override file, loaded last and watched for changes.
    pub override_file: Option<String>,

    /// Refresh interval in seconds.
    pub refresh_interval_secs: u64,

    /// Per-fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Fetch attempts per source before its previous snapshot is kept.
    pub fetch_attempts: u32,

    /// Base delay for retry backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for retry backoff in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: Vec::new(),
            override_file: None,
            refresh_interval_secs: 3600,
            fetch_timeout_secs: 30,
            fetch_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// Maximum number of cached responses.
    pub max_entries: usize,

    /// Entry time-to-live in seconds.
    pub ttl_secs: u64,

    /// Interval between sweeps of expired entries, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

/// Request limits checked before any handler runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum selector length in characters.
    pub max_selector_len: usize,

    /// Maximum query length in characters.
    pub max_query_len: usize,

    /// Maximum share of special characters in a selector or query.
    pub max_special_char_ratio: f64,

    /// Maximum count of combining, invisible and private-use characters.
    pub max_unicode_complexity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_selector_len: 255,
            max_query_len: 2000,
            max_special_char_ratio: 0.30,
            max_unicode_complexity: 16,
        }
    }
}

/// Sanitization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Extra jailbreak phrases (matched case-insensitively).
    pub extra_block_phrases: Vec<String>,

    /// Marker substituted for redacted output.
    pub redaction_marker: String,

    /// Redact private-network IP literals from output.
    pub redact_private_ips: bool,

    /// Minimum length of a system-prompt fragment considered leaked.
    pub min_prompt_fragment_len: usize,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            extra_block_phrases: Vec::new(),
            redaction_marker: "[REDACTED]".to_string(),
            redact_private_ips: true,
            min_prompt_fragment_len: 24,
        }
    }
}

/// Streaming formatter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Target line width in characters.
    pub line_width: usize,

    /// Extra characters allowed before a forced word break.
    pub tolerance: usize,

    /// Length at which a run without whitespace is hard-split.
    pub max_line_chars: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            line_width: 65,
            tolerance: 15,
            max_line_chars: 512,
        }
    }
}

/// Generation backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the Ollama-compatible backend.
    pub backend_url: String,

    /// Model used when a persona names none.
    pub default_model: String,

    /// Persona used when a request names none.
    pub default_persona: String,

    /// Concurrent generations admitted to the backend.
    pub max_concurrent: usize,

    /// Fragments buffered between producer and consumer.
    pub queue_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:11434".to_string(),
            default_model: "llama3.2".to_string(),
            default_persona: "helpful".to_string(),
            max_concurrent: 4,
            queue_capacity: 32,
        }
    }
}

/// A named system-prompt preset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersonaConfig {
    /// Persona identifier used in selectors and cache fingerprints.
    pub name: String,

    /// Short description for menus and finger output.
    #[serde(default)]
    pub description: String,

    /// Model override for this persona.
    #[serde(default)]
    pub model: Option<String>,

    /// System prompt sent with every generation.
    pub system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "helpful".to_string(),
            description: "A concise, friendly assistant.".to_string(),
            model: None,
            system_prompt: "You are a concise and friendly assistant answering questions \
                for readers of a plain-text protocol. Answer in plain text without markup."
                .to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder key rejected by validation when the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
