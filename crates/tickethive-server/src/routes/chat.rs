use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tickethive_schema::IncidentStatus;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/end_session", post(end_session))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub incident_id: Option<String>,
    pub reply: String,
    pub status: Option<IncidentStatus>,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    // First contact may arrive without a session id; mint one server-side.
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let outcome = state
        .engine
        .start_or_continue(&session_id, &request.query)
        .await
        .map_err(ApiError::user_facing)?;

    Ok(Json(ChatResponse {
        session_id,
        incident_id: outcome.incident_id,
        reply: outcome.reply_text,
        status: outcome.status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: String,
}

async fn end_session(
    State(state): State<AppState>,
    Json(request): Json<EndSessionRequest>,
) -> Json<serde_json::Value> {
    let ended = state.engine.end_session(&request.session_id);
    Json(serde_json::json!({ "ended": ended }))
}
