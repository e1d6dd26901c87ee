use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tickethive_schema::{IncidentRecord, IncidentStatus};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/incidents/{id}/status", put(override_status))
        .route("/knowledge_base", get(get_knowledge_base))
        .route("/knowledge_base", post(update_knowledge_base))
        .route("/stats", get(stats))
}

#[derive(Debug, Deserialize)]
pub struct IncidentFilter {
    #[serde(default)]
    pub status: Option<String>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(filter): Query<IncidentFilter>,
) -> Result<Json<Vec<IncidentRecord>>, ApiError> {
    let status = match filter.status.as_deref() {
        Some(raw) => Some(
            IncidentStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let incidents = state
        .engine
        .list_incidents(status)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(incidents))
}

async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IncidentRecord>, ApiError> {
    let incident = state.engine.get_incident(&id).await.map_err(ApiError::admin)?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub new_status: IncidentStatus,
    pub message: String,
}

async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<IncidentRecord>, ApiError> {
    let updated = state
        .annotator
        .apply_override(&id, request.new_status, &request.message)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
pub struct KnowledgeBaseResponse {
    pub kb_content: String,
}

async fn get_knowledge_base(
    State(state): State<AppState>,
) -> Result<Json<KnowledgeBaseResponse>, ApiError> {
    let kb_content = state.indexer.kb_text().await.map_err(ApiError::admin)?;
    Ok(Json(KnowledgeBaseResponse { kb_content }))
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeBaseUpdate {
    pub kb_content: String,
}

async fn update_knowledge_base(
    State(state): State<AppState>,
    Json(request): Json<KnowledgeBaseUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .indexer
        .update_knowledge_base(&request.kb_content)
        .await
        .map_err(ApiError::admin)?;
    Ok(Json(serde_json::json!({
        "chunk_count": outcome.chunk_count,
        "generation": outcome.generation,
    })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.store.status_counts().await.map_err(ApiError::admin)?;
    let total: i64 = counts.iter().map(|(_, count)| count).sum();
    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count.into()))
        .collect();
    Ok(Json(serde_json::json!({
        "total_incidents": total,
        "by_status": by_status,
    })))
}
