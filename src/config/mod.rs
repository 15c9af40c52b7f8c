//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup and never mutated
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BlocklistConfig, CacheConfig, GenerationConfig, LimitsConfig, ListenerConfig,
    ObservabilityConfig, PersonaConfig, RateLimitConfig, SanitizeConfig, ServerConfig,
    ServerIdentity, StreamingConfig, TimeoutConfig,
};
