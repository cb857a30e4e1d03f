//! HTTP API gateway for Mnemo.
//!
//! Exposes the chat turn, the per-session memory debug projection, the
//! human-takeover switch and an on-demand retention sweep.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use chrono::{DateTime, Utc};
use mnemo_agent::{TokenEstimator, TurnProcessor};
use mnemo_workflow::RetentionReaper;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub processor: Arc<TurnProcessor>,
    pub reaper: Arc<RetentionReaper>,
    pub estimator: TokenEstimator,
    /// Bearer token guarding `/v1/admin`; open when `None`.
    pub admin_token: Option<String>,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        processor: Arc<TurnProcessor>,
        reaper: Arc<RetentionReaper>,
        estimator: TokenEstimator,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            processor,
            reaper,
            estimator,
            admin_token: admin_token.filter(|t| !t.is_empty()),
            start_time: Utc::now(),
        }
    }
}

/// Build the full router: `/health` plus the v1 API.
pub fn build_router(state: SharedState) -> Router {
    let admin = api_v1::admin_router(state.clone())
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state).merge(admin))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve the gateway until `shutdown` fires.
pub async fn serve(
    state: SharedState,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{host}:{port}");
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    store: String,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        store: state.processor.store().name().to_string(),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
    })
}

/// Requires `Authorization: Bearer <admin_token>` when a token is configured.
async fn admin_auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "Unauthorized admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
