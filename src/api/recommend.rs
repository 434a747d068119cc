//! `GET /api/recommend/{sessionId}` and `POST /api/recommendations/batch`
//! (spec §6, C5, C9).

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::RecommendationCache;
use crate::error::ApiError;
use crate::orchestrator::RecommendFilters;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    #[serde(rename = "minPrice")]
    pub min_price: Option<f64>,
    #[serde(rename = "maxPrice")]
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

pub async fn recommend_one(
    Path(session_id): Path<Uuid>,
    Query(query): Query<RecommendQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = RecommendFilters {
        min_price: query.min_price,
        max_price: query.max_price,
        category: query.category.clone(),
    };
    let count = query.limit.unwrap_or(1).max(1);

    let result = fetch_recommendation(&state, session_id, filters.clone(), count).await?;

    let item = result.items.first().cloned();
    Ok(Json(json!({
        "success": true,
        "recommendation": item,
        "partial": result.partial,
        "user_stats": result.user_stats,
        "diversity_info": result.diversity_info,
        "filters_applied": filters,
    })))
}

/// Shared recommend path used by both the single-item endpoint and each
/// item of a batch request: cache lookup (C9), orchestrate on miss (C5),
/// cache the result.
async fn fetch_recommendation(
    state: &AppState,
    session_id: Uuid,
    filters: RecommendFilters,
    count: usize,
) -> Result<crate::orchestrator::RecommendResult, ApiError> {
    if state.config.cache_enabled {
        let history_length = state
            .orchestrator
            .history_len(&session_id)
            .await
            .unwrap_or(0);
        let key = RecommendationCache::key(session_id, &filters, count, history_length);
        if let Some(cached) = state.cache.get(key) {
            return Ok(cached);
        }
        let result = state.orchestrator.recommend(session_id, filters, count).await?;
        state.cache.put(session_id, key, result.clone());
        Ok(result)
    } else {
        state.orchestrator.recommend(session_id, filters, count).await
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchRecommendRequest {
    pub requests: Vec<BatchRecommendItem>,
    #[serde(rename = "globalSettings", default)]
    pub global_settings: Option<RecommendFilters>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRecommendItem {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub filters: Option<RecommendFilters>,
}

pub const MAX_BATCH_RECOMMEND: usize = 10;

pub async fn recommend_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRecommendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.requests.is_empty() {
        return Err(ApiError::Validation {
            message: "requests must be non-empty".to_string(),
            details: None,
        });
    }
    if body.requests.len() > MAX_BATCH_RECOMMEND {
        return Err(ApiError::Validation {
            message: format!("batch requests are capped at {MAX_BATCH_RECOMMEND} items"),
            details: None,
        });
    }

    let mut results = Vec::with_capacity(body.requests.len());
    for item in &body.requests {
        let filters = item
            .filters
            .clone()
            .or_else(|| body.global_settings.clone())
            .unwrap_or_default();
        let count = item.count.unwrap_or(1).max(1);
        match fetch_recommendation(&state, item.session_id, filters, count).await {
            Ok(result) => results.push(json!({
                "session_id": item.session_id,
                "success": true,
                "items": result.items,
                "partial": result.partial,
                "user_stats": result.user_stats,
                "diversity_info": result.diversity_info,
            })),
            Err(e) => results.push(json!({
                "session_id": item.session_id,
                "success": false,
                "error": e.into_response().status().as_u16(),
            })),
        }
    }

    Ok(Json(json!({
        "success": true,
        "results": results,
    })))
}
