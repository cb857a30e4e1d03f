//! Versioned REST API: `/v1/*` routes.
//!
//! - `POST /v1/chat` runs one turn through the memory lifecycle
//! - `GET /v1/debug/memory/{user_id}/{session_id}` projects a session's memory
//! - `POST /v1/sessions/{user_id}/{session_id}/pause` and `/resume` toggle
//!   human takeover
//! - `POST /v1/admin/retention/sweep` runs one retention sweep now

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::Utc;
use mnemo_agent::{SessionMemoryInfo, TurnOutcome};
use mnemo_core::error::{Error, StoreError};
use mnemo_core::session::SessionId;
use mnemo_workflow::SweepStats;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::SharedState;

/// Public v1 routes.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/debug/memory/{user_id}/{session_id}", get(memory_debug_handler))
        .route("/sessions/{user_id}/{session_id}/pause", post(pause_handler))
        .route("/sessions/{user_id}/{session_id}/resume", post(resume_handler))
        .with_state(state)
}

/// Operator routes, guarded by the admin token in [`crate::build_router`].
pub fn admin_router(state: SharedState) -> Router {
    Router::new()
        .route("/admin/retention/sweep", post(sweep_handler))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct PauseResponse {
    session_id: String,
    ai_paused: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, e.to_string()),
        other => {
            error!(error = %other, "Store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Store error: {other}"))
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    if payload.user_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "user_id must not be empty"));
    }
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let session_id = payload
        .session_id
        .filter(|s| !s.is_empty())
        .map(SessionId::from);
    info!(
        user_id = %payload.user_id,
        new_session = session_id.is_none(),
        "v1/chat request"
    );

    match state
        .processor
        .process(&payload.user_id, session_id, &payload.message)
        .await
    {
        Ok(outcome) => Ok(Json(outcome)),
        Err(Error::Store(e)) => Err(store_error(e)),
        Err(e) => {
            error!(error = %e, "Turn failed");
            Err(api_error(StatusCode::BAD_GATEWAY, format!("Agent error: {e}")))
        }
    }
}

async fn memory_debug_handler(
    State(state): State<SharedState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<SessionMemoryInfo>, ApiError> {
    let processor = &state.processor;
    let session = processor
        .store()
        .get_session(processor.app_name(), &user_id, &SessionId::from(session_id))
        .await
        .map_err(store_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Session not found"))?;

    Ok(Json(SessionMemoryInfo::from_session(
        &session,
        &state.estimator,
        Utc::now(),
    )))
}

async fn pause_handler(
    State(state): State<SharedState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<PauseResponse>, ApiError> {
    set_paused(&state, user_id, session_id, true).await
}

async fn resume_handler(
    State(state): State<SharedState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<PauseResponse>, ApiError> {
    set_paused(&state, user_id, session_id, false).await
}

async fn set_paused(
    state: &SharedState,
    user_id: String,
    session_id: String,
    paused: bool,
) -> Result<Json<PauseResponse>, ApiError> {
    let id = SessionId::from(session_id);
    state
        .processor
        .set_paused(&user_id, &id, paused)
        .await
        .map_err(store_error)?;
    info!(session_id = %id.short(), paused, "Human takeover toggled");

    Ok(Json(PauseResponse {
        session_id: id.to_string(),
        ai_paused: paused,
    }))
}

async fn sweep_handler(State(state): State<SharedState>) -> Json<SweepStats> {
    info!("Manual retention sweep requested");
    Json(state.reaper.sweep(Utc::now()).await)
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::test_support::{test_state, test_state_with};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use mnemo_agent::{SessionMemoryInfo, TurnOutcome};
    use mnemo_core::session::{Event, Session, keys};
    use mnemo_memory::InMemorySessionStore;
    use mnemo_workflow::SweepStats;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_starts_session_and_continues_it() {
        let app = build_router(test_state());

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/chat",
                serde_json::json!({"user_id": "u1", "message": "Do you sell oak tables?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first: TurnOutcome = body_json(response).await;
        assert_eq!(first.reply, "Happy to help.");
        assert_eq!(first.event_count, 2);

        let response = app
            .oneshot(post_json(
                "/v1/chat",
                serde_json::json!({
                    "user_id": "u1",
                    "session_id": first.session_id.as_str(),
                    "message": "In walnut too?"
                }),
            ))
            .await
            .unwrap();
        let second: TurnOutcome = body_json(response).await;
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.event_count, 4);
    }

    #[tokio::test]
    async fn chat_rejects_empty_message() {
        let app = build_router(test_state());
        let response = app
            .oneshot(post_json(
                "/v1/chat",
                serde_json::json!({"user_id": "u1", "message": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn debug_memory_projects_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut session = Session::new("mnemo", "u1");
        session.events.push(Event::user("hello there"));
        session.state.set(keys::CONVERSATION_SUMMARY, "Greeted the agent");
        session.state.set(keys::SUMMARY_EVENT_COUNT, 1);
        let id = session.id.clone();
        store.import_session(session).await;

        let app = build_router(test_state_with(store, None));
        let req = Request::builder()
            .uri(format!("/v1/debug/memory/u1/{id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let info: SessionMemoryInfo = body_json(response).await;
        assert_eq!(info.conversation_id, id.to_string());
        assert!(info.has_summary);
        assert_eq!(info.summary_covers_events, 1);
        assert_eq!(info.event_count, 1);
    }

    #[tokio::test]
    async fn debug_memory_missing_session_is_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/debug/memory/u1/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pause_short_circuits_turns() {
        let app = build_router(test_state());

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/chat",
                serde_json::json!({"user_id": "u1", "message": "hi"}),
            ))
            .await
            .unwrap();
        let first: TurnOutcome = body_json(response).await;

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/v1/sessions/u1/{}/pause", first.session_id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json(
                "/v1/chat",
                serde_json::json!({
                    "user_id": "u1",
                    "session_id": first.session_id.as_str(),
                    "message": "anyone?"
                }),
            ))
            .await
            .unwrap();
        let second: TurnOutcome = body_json(response).await;
        assert!(second.paused);
    }

    #[tokio::test]
    async fn pause_unknown_session_is_404() {
        let app = build_router(test_state());
        let response = app
            .oneshot(post_json("/v1/sessions/u1/ghost/pause", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_sweep_reclaims_expired_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        let mut old = Session::new("mnemo", "u1");
        old.events.push(Event::user("old question"));
        old.last_update_time = chrono::Utc::now() - chrono::Duration::days(91);
        store.import_session(old).await;

        let app = build_router(test_state_with(store.clone(), None));
        let response = app
            .oneshot(post_json("/v1/admin/retention/sweep", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stats: SweepStats = body_json(response).await;
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.deleted, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sweep_requires_admin_token_when_configured() {
        let store = Arc::new(InMemorySessionStore::new());
        let app = build_router(test_state_with(store, Some("s3cret")));

        let response = app
            .clone()
            .oneshot(post_json("/v1/admin/retention/sweep", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/v1/admin/retention/sweep")
            .header("Authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
