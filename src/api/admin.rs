//! Operational endpoints: duplicate-detection stats/reset, cache
//! stats/clear/invalidate (spec §6 "Admin").

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn duplicate_detection_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "success": true, "stats": state.guard.stats() }))
}

/// Dev-only; refuses outside development to avoid wiping live dedup state
/// (spec §6 "gated on debug routes / non-production").
pub async fn duplicate_detection_reset(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if state.config.node_env == "production" && !state.config.enable_debug_routes {
        return Err(ApiError::Validation {
            message: "duplicate-detection reset is disabled in production".to_string(),
            details: None,
        });
    }
    state.guard.reset();
    Ok(Json(json!({ "success": true })))
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "success": true, "stats": state.cache.stats() }))
}

pub async fn cache_clear(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.clear();
    Json(json!({ "success": true }))
}

pub async fn cache_invalidate_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    state.cache.invalidate_session(session_id);
    Json(json!({ "success": true }))
}
