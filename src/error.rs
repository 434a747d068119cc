//! Crate-wide error kinds and their HTTP disposition (spec §7).

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Error kinds surfaced to HTTP clients. Internal library code should
/// prefer `anyhow::Result` and only convert to `ApiError` at the
/// handler boundary.
#[derive(Debug, Clone)]
pub enum ApiError {
    Validation { message: String, details: Option<serde_json::Value> },
    SessionNotFound,
    ProductNotFound,
    SessionInactive,
    NoCandidates,
    DuplicateRequest { retry_after_seconds: u64 },
    RapidFeedback { retry_after_seconds: u64 },
    FeedbackConflict { retry_after_seconds: u64 },
    BatchConflict { details: serde_json::Value },
    RateLimited { retry_after_seconds: u64 },
    UnsupportedVersion { requested: String, supported: Vec<u32> },
    ModelSingular,
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation",
            ApiError::SessionNotFound => "session_not_found",
            ApiError::ProductNotFound => "product_not_found",
            ApiError::SessionInactive => "session_inactive",
            ApiError::NoCandidates => "no_candidates",
            ApiError::DuplicateRequest { .. } => "duplicate_request",
            ApiError::RapidFeedback { .. } => "rapid_feedback",
            ApiError::FeedbackConflict { .. } => "feedback_conflict",
            ApiError::BatchConflict { .. } => "batch_conflict",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::UnsupportedVersion { .. } => "unsupported_version",
            ApiError::ModelSingular => "model_singular",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound | ApiError::ProductNotFound | ApiError::NoCandidates => {
                StatusCode::NOT_FOUND
            }
            ApiError::SessionInactive => StatusCode::GONE,
            ApiError::DuplicateRequest { .. }
            | ApiError::RapidFeedback { .. }
            | ApiError::FeedbackConflict { .. }
            | ApiError::BatchConflict { .. } => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UnsupportedVersion { .. } => StatusCode::BAD_REQUEST,
            ApiError::ModelSingular | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::SessionNotFound => "session not found".to_string(),
            ApiError::ProductNotFound => "product not found".to_string(),
            ApiError::SessionInactive => "session is inactive".to_string(),
            ApiError::NoCandidates => "no eligible candidates for this session".to_string(),
            ApiError::DuplicateRequest { .. } => "duplicate request".to_string(),
            ApiError::RapidFeedback { .. } => {
                "identical feedback submitted too rapidly".to_string()
            }
            ApiError::FeedbackConflict { .. } => {
                "conflicting feedback for this product within the lockout window".to_string()
            }
            ApiError::BatchConflict { .. } => "conflicting items in batch request".to_string(),
            ApiError::RateLimited { .. } => "rate limit exceeded".to_string(),
            ApiError::UnsupportedVersion { requested, supported } => format!(
                "unsupported API version {requested}, supported: {supported:?}"
            ),
            ApiError::ModelSingular => "bandit model matrix could not be inverted".to_string(),
            ApiError::Internal(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let mut body = json!({
            "success": false,
            "error": self.kind(),
            "message": self.message(),
        });

        match &self {
            ApiError::Validation { details: Some(d), .. } => {
                body["details"] = d.clone();
            }
            ApiError::DuplicateRequest { retry_after_seconds }
            | ApiError::RapidFeedback { retry_after_seconds }
            | ApiError::FeedbackConflict { retry_after_seconds }
            | ApiError::RateLimited { retry_after_seconds } => {
                body["retry_after_seconds"] = json!(retry_after_seconds);
                body["conflict_info"] = json!({
                    "type": self.kind(),
                    "retry_after_seconds": retry_after_seconds,
                });
            }
            ApiError::BatchConflict { details } => {
                body["conflict_info"] = details.clone();
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(format!("storage error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_to_status() {
        assert_eq!(ApiError::SessionNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::SessionInactive.status(), StatusCode::GONE);
        assert_eq!(
            ApiError::RateLimited { retry_after_seconds: 5 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::ModelSingular.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
