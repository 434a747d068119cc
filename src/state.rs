//! Shared application state threaded through every handler via
//! `axum::extract::State`.

use std::sync::Arc;

use crate::cache::RecommendationCache;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::feedback::FeedbackProcessor;
use crate::guard::Guard;
use crate::middleware::rate_limit::RateLimiter;
use crate::orchestrator::RecommendationOrchestrator;
use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogStore,
    pub sessions: SessionStore,
    pub orchestrator: RecommendationOrchestrator,
    pub feedback: FeedbackProcessor,
    pub guard: Arc<Guard>,
    pub cache: Arc<RecommendationCache>,
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
}
