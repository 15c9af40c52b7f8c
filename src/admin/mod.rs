//! Admin HTTP API.
//!
//! # Endpoints
//! ```text
//! GET    /admin/status             version, uptime, connections
//! GET    /admin/stats              blocklist, limiter, bans, cache, generation
//! POST   /admin/bans/{ip}          {"duration_secs": n}  (ip may be "tor")
//! DELETE /admin/bans/{ip}
//! POST   /admin/blocklist/refresh
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::server::App;

#[derive(Clone)]
pub struct AdminState {
    pub app: Arc<App>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(app: Arc<App>) -> Router {
    let api_key: Arc<str> = Arc::from(app.services.config.admin.api_key.as_str());
    let state = AdminState { app, api_key };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route("/admin/bans/{ip}", post(post_ban).delete(delete_ban))
        .route("/admin/blocklist/refresh", post(post_blocklist_refresh))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve(
    app: Arc<App>,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(app))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Admin API received shutdown signal, exiting loop");
        })
        .await
}
