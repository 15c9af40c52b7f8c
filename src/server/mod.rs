//! Protocol server.
//!
//! # Responsibilities
//! - Build the shared application state from configuration
//! - Bind one listener per configured endpoint
//! - Run an accept loop per listener, spawning one session task per connection
//! - Spawn background maintenance tasks (blocklist, limiter cleanup, cache sweep)
//!
//! # Data Flow
//! ```text
//! Listener::accept (permit-bounded)
//!     → tokio::spawn(session::run)
//!         → AdmissionGate → read request line → parse → Dispatcher → finish
//! ```
//!
//! # Design Decisions
//! - All shared state lives in one `Arc<App>`; sessions hold no locks across awaits
//! - Accept loops exit on the shutdown broadcast; sessions already running
//!   finish on their own and are awaited through the connection tracker

pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::ResponseCache;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::features::{self, Services};
use crate::generation::{GenerationService, Generator};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::sanitize::Sanitizer;
use crate::security::{AdmissionGate, Blocklist, BlocklistError, RateLimiter};

/// Errors while assembling or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("blocklist error: {0}")]
    Blocklist(#[from] BlocklistError),
}

/// Shared state for every session.
pub struct App {
    pub services: Services,
    pub dispatcher: Dispatcher,
}

impl App {
    /// Wire every subsystem from `config` around `generator`.
    pub fn build(config: Arc<ServerConfig>, generator: Arc<dyn Generator>) -> Result<Self, ServerError> {
        let sanitizer = Sanitizer::from_config(&config);
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let generation = Arc::new(GenerationService::new(
            generator,
            cache,
            sanitizer.output.clone(),
            &config,
        ));
        let blocklist = Arc::new(Blocklist::new(config.blocklist.clone())?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        let services = Services {
            config,
            generation,
            gate: AdmissionGate::new(blocklist, limiter),
            tracker: ConnectionTracker::new(),
            started_at: Instant::now(),
        };
        let dispatcher = features::register(&services, &sanitizer);

        Ok(Self { services, dispatcher })
    }

    /// Spawn the blocklist refresher, rate-limiter cleanup and cache sweeper.
    pub fn spawn_background(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let blocklist = Arc::clone(self.services.gate.blocklist());
        let limiter = Arc::clone(self.services.gate.limiter());
        let cache = Arc::clone(self.services.generation.cache());
        vec![
            tokio::spawn(blocklist.run(shutdown.subscribe())),
            tokio::spawn(limiter.run_cleanup(shutdown.subscribe())),
            tokio::spawn(cache.run_sweeper(shutdown.subscribe())),
        ]
    }
}

/// Bound listeners plus the state they serve.
pub struct Server {
    app: Arc<App>,
    listeners: Vec<Listener>,
}

impl Server {
    /// Bind every listener in the configuration.
    pub async fn bind(app: Arc<App>) -> Result<Self, ServerError> {
        let mut listeners = Vec::new();
        for config in &app.services.config.listeners {
            listeners.push(Listener::bind(config).await?);
        }
        Ok(Self { app, listeners })
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Bound addresses, in configuration order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().filter_map(|l| l.local_addr().ok()).collect()
    }

    /// Start one accept loop per listener.
    pub fn spawn(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        self.listeners
            .into_iter()
            .map(|listener| {
                let app = Arc::clone(&self.app);
                tokio::spawn(accept_loop(app, listener, shutdown.subscribe()))
            })
            .collect()
    }
}

async fn accept_loop(app: Arc<App>, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
    let protocol = listener.protocol();
    let network = listener.network();
    tracing::info!(protocol = %protocol, network = network.as_str(), "Accept loop starting");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr, permit)) => {
                    let app = Arc::clone(&app);
                    tokio::spawn(async move {
                        let _permit = permit;
                        session::run(app, stream, Some(addr), protocol, network).await;
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    // Typically EMFILE; back off instead of spinning.
                    tracing::warn!(protocol = %protocol, error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.recv() => {
                tracing::info!(protocol = %protocol, "Accept loop received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
