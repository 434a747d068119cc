//! `POST /api/session` (spec §6).

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.user_id.trim().is_empty() {
        return Err(ApiError::Validation {
            message: "userId is required".to_string(),
            details: None,
        });
    }

    let session = state
        .sessions
        .create(&body.user_id, state.config.alpha_default, state.config.feature_dimensions)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "session_id": session.session_id,
            "algorithm": "LinUCB",
            "configuration": {
                "alpha": session.alpha,
                "feature_dimensions": session.dimensions,
                "exploration_strategy": "upper-confidence-bound",
            },
        })),
    ))
}
