//! burrow: an AI text server for small-internet protocols.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                          BURROW                          │
//!                      │                                                          │
//!   Gopher / Gemini /  │  ┌──────────┐    ┌───────────┐    ┌────────────────┐     │
//!   Finger client ─────┼─▶│   net    │───▶│ admission │───▶│    protocol    │     │
//!                      │  │ listener │    │   gate    │    │ read + parse   │     │
//!                      │  └──────────┘    └─────┬─────┘    └───────┬────────┘     │
//!                      │              blocklist │ rate limit       ▼              │
//!                      │                        │          ┌────────────────┐     │
//!                      │                        │          │   dispatch     │     │
//!                      │                        │          │ limits, input  │     │
//!                      │                        │          │ filter, route  │     │
//!                      │                        │          └───────┬────────┘     │
//!                      │                        │                  ▼              │
//!                      │                        │          ┌────────────────┐     │
//!                      │                        │          │   features     │     │
//!                      │                        │          └───────┬────────┘     │
//!                      │                        │                  ▼              │
//!   Response lines     │  ┌──────────┐    ┌─────┴─────┐    ┌────────────────┐     │
//!   ◀──────────────────┼──│ response │◀───│ streaming │◀───│  generation    │◀────┼── Ollama
//!                      │  │  writer  │    │ formatter │    │ cache + relay  │     │
//!                      │  └──────────┘    └───────────┘    └────────────────┘     │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use burrow::config::{load_config, ServerConfig};
use burrow::generation::{Generator, OllamaGenerator};
use burrow::lifecycle::{wait_for_shutdown, Shutdown};
use burrow::observability::{logging, metrics};
use burrow::{admin, App, Server};

#[derive(Parser)]
#[command(name = "burrow", version, about = "AI text server for Gopher, Gemini and Finger")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "burrow.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else if cli.check_config {
        return Err(format!("config file {} not found", cli.config.display()).into());
    } else {
        ServerConfig::default()
    };

    if cli.check_config {
        println!("{}: configuration is valid", cli.config.display());
        return Ok(());
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "burrow starting");
    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let config = Arc::new(config);
    let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(
        &config.generation.backend_url,
        Duration::from_secs(config.timeouts.generation_secs),
    )?);
    tracing::info!(
        backend = %config.generation.backend_url,
        model = %config.generation.default_model,
        personas = config.personas.len(),
        "Generation backend configured"
    );

    let app = Arc::new(App::build(Arc::clone(&config), generator)?);
    let shutdown = Shutdown::new();
    let mut tasks = app.spawn_background(&shutdown);

    if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let admin_app = Arc::clone(&app);
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_app, addr, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    let server = Server::bind(Arc::clone(&app)).await?;
    tasks.extend(server.spawn(&shutdown));

    let signal = wait_for_shutdown().await;
    tracing::info!(signal = signal.as_str(), "Shutdown signal received");

    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    shutdown.drain(&app.services.tracker, grace).await;
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
