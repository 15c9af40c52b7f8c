use std::net::IpAddr;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::cache::CacheStats;
use crate::security::{BlocklistStats, ClientKey, RateLimiterStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub backend: String,
}

#[derive(Serialize)]
pub struct BanEntry {
    pub client: String,
    pub remaining_secs: u64,
}

#[derive(Serialize)]
pub struct GenerationStats {
    pub in_flight: usize,
    pub max_concurrent: usize,
}

#[derive(Serialize)]
pub struct Stats {
    pub blocklist: BlocklistStats,
    pub rate_limiter: RateLimiterStats,
    pub bans: Vec<BanEntry>,
    pub cache: CacheStats,
    pub generation: GenerationStats,
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct BanResponse {
    pub client: String,
    pub duration_secs: u64,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub ok: bool,
    pub error: Option<String>,
    pub blocklist: BlocklistStats,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({ "error": message })))
}

/// `tor` names the shared Tor bucket; anything else must be an IP address.
fn parse_client(raw: &str) -> Result<ClientKey, ApiError> {
    if raw.eq_ignore_ascii_case("tor") {
        return Ok(ClientKey::Tor);
    }
    raw.parse::<IpAddr>()
        .map(|ip| ClientKey::Ip(ip.to_canonical()))
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid address"))
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let services = &state.app.services;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: services.started_at.elapsed().as_secs(),
        active_connections: services.tracker.active_count(),
        backend: services.generation.backend_name().to_string(),
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<Stats> {
    let services = &state.app.services;
    let limiter = services.gate.limiter();
    let bans = limiter
        .bans()
        .into_iter()
        .map(|(client, remaining)| BanEntry {
            client: client.to_string(),
            remaining_secs: remaining.as_secs(),
        })
        .collect();

    Json(Stats {
        blocklist: services.gate.blocklist().stats(),
        rate_limiter: limiter.stats(),
        bans,
        cache: services.generation.cache().stats(),
        generation: GenerationStats {
            in_flight: services.generation.in_flight(),
            max_concurrent: services.generation.max_concurrent(),
        },
    })
}

pub async fn post_ban(
    State(state): State<AdminState>,
    Path(raw): Path<String>,
    Json(body): Json<BanRequest>,
) -> Result<Json<BanResponse>, ApiError> {
    let client = parse_client(&raw)?;
    let duration_secs = body
        .duration_secs
        .unwrap_or(state.app.services.config.rate_limit.ban_secs);
    if duration_secs == 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "duration_secs must be positive"));
    }

    state
        .app
        .services
        .gate
        .limiter()
        .ban(client, Duration::from_secs(duration_secs));
    tracing::info!(client = %client, duration_secs, "Client banned via admin API");

    Ok(Json(BanResponse {
        client: client.to_string(),
        duration_secs,
    }))
}

pub async fn delete_ban(
    State(state): State<AdminState>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let client = parse_client(&raw)?;
    if state.app.services.gate.limiter().unban(client) {
        tracing::info!(client = %client, "Client unbanned via admin API");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "client is not banned"))
    }
}

pub async fn post_blocklist_refresh(
    State(state): State<AdminState>,
) -> (StatusCode, Json<RefreshResponse>) {
    let blocklist = state.app.services.gate.blocklist();
    let result = blocklist.refresh().await;
    let (status, error) = match result {
        Ok(report) => {
            tracing::info!(refreshed = report.refreshed.len(), "Blocklist refreshed via admin API");
            (StatusCode::OK, None)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Blocklist refresh via admin API incomplete");
            (StatusCode::BAD_GATEWAY, Some(e.to_string()))
        }
    };
    (
        status,
        Json(RefreshResponse {
            ok: error.is_none(),
            error,
            blocklist: blocklist.stats(),
        }),
    )
}
