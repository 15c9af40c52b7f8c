//! Built-in feature handlers.
//!
//! # Routes
//! ```text
//! ""  "/"          → menu.rs      root menu
//! "/ask[/persona]" → ask.rs       AI answer (Gopher type 7, Gemini input prompt)
//! "/personas"      → personas.rs  persona directory
//! "/about"         → about.rs     server description
//! "/status"        → status.rs    blocklist, limiter, cache and backend statistics
//! Finger           → finger.rs    persona directory, `/W` adds model details
//! ```

pub mod about;
pub mod ask;
pub mod finger;
pub mod menu;
pub mod personas;
pub mod status;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{PersonaConfig, ServerConfig};
use crate::dispatch::{Dispatcher, Router};
use crate::generation::GenerationService;
use crate::net::ConnectionTracker;
use crate::sanitize::Sanitizer;
use crate::security::{AdmissionGate, RequestLimits};

/// Shared state every handler may read.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ServerConfig>,
    pub generation: Arc<GenerationService>,
    pub gate: AdmissionGate,
    pub tracker: ConnectionTracker,
    pub started_at: Instant,
}

impl Services {
    /// Persona named `name`, or the default persona for an empty name.
    pub fn resolve_persona(&self, name: &str) -> Option<&PersonaConfig> {
        if name.is_empty() {
            self.config.default_persona()
        } else {
            self.config.persona(name)
        }
    }

    /// Model used for `persona`.
    pub fn model_for<'a>(&'a self, persona: &'a PersonaConfig) -> &'a str {
        persona
            .model
            .as_deref()
            .unwrap_or(&self.config.generation.default_model)
    }
}

/// Selector routes for Gopher and Gemini.
pub fn routes(services: &Services) -> Router {
    Router::new()
        .route("/", Arc::new(menu::MenuHandler::new(services.clone())))
        .route("/ask", Arc::new(ask::AskHandler::new(services.clone())))
        .route("/personas", Arc::new(personas::PersonasHandler::new(services.clone())))
        .route("/about", Arc::new(about::AboutHandler::new(services.clone())))
        .route("/status", Arc::new(status::StatusHandler::new(services.clone())))
}

/// Build the dispatcher with every built-in feature registered.
pub fn register(services: &Services, sanitizer: &Sanitizer) -> Dispatcher {
    Dispatcher::new(
        RequestLimits::new(&services.config.limits),
        sanitizer.input.clone(),
        routes(services),
    )
    .with_finger(Arc::new(finger::FingerHandler::new(services.clone())))
}

/// `3d 4h 12m`, `4h 12m` or `12m 5s`.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m {}s", secs % 60)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formats() {
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3 * 3600 + 120)), "3h 2m");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400 + 3600)), "2d 1h 0m");
    }

    #[test]
    fn resolves_default_and_named_personas() {
        let services = testing::services();
        assert_eq!(services.resolve_persona("").unwrap().name, "helpful");
        let pirate = services.resolve_persona("PIRATE").unwrap();
        assert_eq!(services.model_for(pirate), "tinyllama");
        assert!(services.resolve_persona("ghost").is_none());
    }

    #[test]
    fn registers_all_routes() {
        let services = testing::services();
        let dispatcher = register(&services, &Sanitizer::default());
        assert_eq!(dispatcher.routes().len(), 5);
    }
}
