//! `POST /api/feedback`, `POST /api/feedback/batch`,
//! `GET /api/feedback/status/{session}/{product}/{action}` (spec §6, C6, C7).

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::guard::{intra_batch_duplicates, GuardDecision};
use crate::models::Action;
use crate::state::AppState;

#[derive(Debug, Deserialize, serde::Serialize)]
pub struct FeedbackRequest {
    pub session_id: Uuid,
    pub product_id: String,
    pub action: Action,
    #[serde(default)]
    pub context: Option<Value>,
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let idem_key = idempotency_key(&headers);
    let body_value = serde_json::to_value(&body).unwrap_or(Value::Null);
    let fingerprint = crate::guard::Guard::fingerprint(
        &client_ip(&headers),
        "POST",
        "/api/feedback",
        &body_value,
        &Value::Null,
    );

    match state.guard.check_feedback(
        fingerprint,
        body.session_id,
        &body.product_id,
        body.action,
        idem_key.as_deref(),
    ) {
        GuardDecision::IdempotentReplay(entry) => {
            return Ok((
                axum::http::StatusCode::from_u16(entry.status).unwrap_or(axum::http::StatusCode::OK),
                Json(entry.body),
            ));
        }
        GuardDecision::Duplicate { retry_after_secs } => {
            return Err(ApiError::DuplicateRequest { retry_after_seconds: retry_after_secs });
        }
        GuardDecision::RapidFeedback { retry_after_secs } => {
            return Err(ApiError::RapidFeedback { retry_after_seconds: retry_after_secs });
        }
        GuardDecision::FeedbackConflict { retry_after_secs } => {
            return Err(ApiError::FeedbackConflict { retry_after_seconds: retry_after_secs });
        }
        GuardDecision::Allow => {}
    }

    state.guard.record_feedback_pass(
        fingerprint,
        body.session_id,
        &body.product_id,
        body.action,
        idem_key.clone(),
    );

    let result = state
        .feedback
        .process(body.session_id, &body.product_id, body.action)
        .await?;

    state.guard.mark_processed(body.session_id, &body.product_id, body.action);

    let response_body = json!({
        "success": true,
        "learning_update": result.learning_update,
        "user_insights": result.user_insights,
        "diversity_stats": result.diversity_stats,
        "score_evolution": result.score_evolution,
    });

    if let Some(key) = idem_key {
        state.guard.store_idempotent_response(key, 200, response_body.clone());
    }

    Ok((axum::http::StatusCode::OK, Json(response_body)))
}

#[derive(Debug, Deserialize)]
pub struct BatchFeedbackRequest {
    pub items: Vec<FeedbackRequest>,
    #[serde(default)]
    pub options: BatchFeedbackOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchFeedbackOptions {
    #[serde(rename = "continueOnError", default)]
    pub continue_on_error: bool,
    #[serde(rename = "ignoreConflicts", default)]
    pub ignore_conflicts: bool,
    /// Accepted for wire compatibility; model updates are always applied
    /// synchronously within `process` (spec §4.6), so this has no effect.
    #[serde(rename = "updateModelImmediately", default)]
    pub update_model_immediately: bool,
}

pub const MAX_BATCH_FEEDBACK: usize = 50;

pub async fn submit_feedback_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchFeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.items.is_empty() {
        return Err(ApiError::Validation {
            message: "items must be non-empty".to_string(),
            details: None,
        });
    }
    if body.items.len() > MAX_BATCH_FEEDBACK {
        return Err(ApiError::Validation {
            message: format!("batch feedback is capped at {MAX_BATCH_FEEDBACK} items"),
            details: None,
        });
    }

    let triples: Vec<(Uuid, String, Action)> = body
        .items
        .iter()
        .map(|i| (i.session_id, i.product_id.clone(), i.action))
        .collect();
    let duplicates = intra_batch_duplicates(&triples);

    // Default options: reject the whole batch with a per-index conflict
    // report (spec §8 S6), without processing anything. `ignoreConflicts`
    // opts into processing, skipping every duplicate but the first
    // occurrence so each conflicting product is applied exactly once.
    if !duplicates.is_empty() && !body.options.ignore_conflicts {
        let details: Vec<Value> = duplicates
            .iter()
            .map(|(&idx, &first)| {
                json!({
                    "index": idx,
                    "conflicts_with_index": first,
                    "product_id": body.items[idx].product_id,
                })
            })
            .collect();
        return Err(ApiError::BatchConflict { details: json!(details) });
    }

    let mut results = Vec::with_capacity(body.items.len());
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut errors = Vec::new();

    for (idx, item) in body.items.iter().enumerate() {
        if duplicates.contains_key(&idx) {
            continue;
        }

        match state
            .feedback
            .process(item.session_id, &item.product_id, item.action)
            .await
        {
            Ok(result) => {
                successful += 1;
                results.push(json!({
                    "index": idx,
                    "success": true,
                    "learning_update": result.learning_update,
                    "score_evolution": result.score_evolution,
                }));
            }
            Err(e) => {
                failed += 1;
                let message = e.message();
                errors.push(json!({ "index": idx, "error": message }));
                results.push(json!({ "index": idx, "success": false, "error": message }));
                if !body.options.continue_on_error {
                    break;
                }
            }
        }
    }

    Ok(Json(json!({
        "success": true,
        "successful_feedbacks": successful,
        "failed_feedbacks": failed,
        "results": results,
        "errors": errors,
    })))
}

pub async fn feedback_status(
    State(state): State<AppState>,
    Path((session_id, product_id, action)): Path<(Uuid, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let action = Action::parse(&action).ok_or_else(|| ApiError::Validation {
        message: format!("unknown action '{action}'"),
        details: None,
    })?;

    match state.guard.status(session_id, &product_id, action) {
        Some(status) => Ok((axum::http::StatusCode::OK, Json(json!({ "success": true, "status": status })))),
        None => Ok((
            axum::http::StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "no feedback record for this triple" })),
        )),
    }
}
