//! `GET /api/metrics`, `GET /api/health`, `GET /health`, `GET /api/version`.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "cache": state.cache.stats(),
        "duplicate_detection": state.guard.stats(),
    }))
}

/// Prometheus-style plaintext exposition, in the teacher's `/metrics`
/// style (counters and gauges, no histograms yet).
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.stats();
    let guard = state.guard.stats();
    let body = format!(
        "# HELP fashion_reco_cache_hits_total Recommendation cache hits\n\
         # TYPE fashion_reco_cache_hits_total counter\n\
         fashion_reco_cache_hits_total {}\n\
         # HELP fashion_reco_cache_misses_total Recommendation cache misses\n\
         # TYPE fashion_reco_cache_misses_total counter\n\
         fashion_reco_cache_misses_total {}\n\
         # HELP fashion_reco_cache_size Current cache entry count\n\
         # TYPE fashion_reco_cache_size gauge\n\
         fashion_reco_cache_size {}\n\
         # HELP fashion_reco_guard_fingerprint_entries Active request fingerprints\n\
         # TYPE fashion_reco_guard_fingerprint_entries gauge\n\
         fashion_reco_guard_fingerprint_entries {}\n\
         # HELP fashion_reco_guard_feedback_entries Active feedback dedup entries\n\
         # TYPE fashion_reco_guard_feedback_entries gauge\n\
         fashion_reco_guard_feedback_entries {}\n",
        cache.hits, cache.misses, cache.size, guard.fingerprint_entries, guard.feedback_entries,
    );
    ([("Content-Type", "text/plain; version=0.0.4")], body)
}

pub async fn api_version(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "current_version": state.config.api_version_default,
        "supported_versions": state.config.api_versions_supported,
    }))
}
