//! Fashion recommendation backend.
//!
//! Stateless-per-request HTTP service fronting a per-session LinUCB
//! contextual bandit (spec §1). Every handler resolves its session,
//! dimension count, and model state fresh from storage; nothing but the
//! guard tables, rate limiter, and recommendation cache live in process
//! memory, and all three are bounded/TTL'd so a restart only costs a
//! cold cache.

mod api;
mod bandit;
mod cache;
mod catalog;
mod config;
mod diversity;
mod error;
mod feedback;
mod guard;
mod history;
mod interactions;
mod middleware;
mod models;
mod orchestrator;
mod sessions;
mod state;
mod versioning;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::RecommendationCache;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::feedback::FeedbackProcessor;
use crate::guard::Guard;
use crate::history::HistoryStore;
use crate::interactions::InteractionStore;
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use crate::orchestrator::{RecommendationOrchestrator, SessionLocks};
use crate::sessions::SessionStore;
use crate::state::AppState;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fashion_reco_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_state(config: Arc<Config>) -> Result<AppState> {
    let conn = Connection::open(&config.database_url)
        .with_context(|| format!("open sqlite db at {}", config.database_url))?;
    let conn = Arc::new(TokioMutex::new(conn));

    let catalog = CatalogStore::new(conn.clone());
    let sessions = SessionStore::new(conn.clone());
    let history = HistoryStore::new(conn.clone());
    let interactions = InteractionStore::new(conn.clone());

    catalog.init_schema().await?;
    sessions.init_schema().await?;
    history.init_schema().await?;
    interactions.init_schema().await?;

    if let Some(path) = &config.catalog_csv_path {
        let loaded = catalog::ingest::ingest_if_empty(&catalog, path).await?;
        if loaded > 0 {
            info!(loaded, "catalog ingested from csv at startup");
        }
    }

    let locks = SessionLocks::new();
    let cache = Arc::new(RecommendationCache::new(
        config.cache_max_size,
        Duration::from_millis(config.cache_ttl_ms),
    ));
    let guard = Arc::new(Guard::new());
    let rate_limiter = RateLimiter::new(RateLimitConfig::from_app_config(&config));

    let orchestrator = RecommendationOrchestrator::new(
        catalog.clone(),
        sessions.clone(),
        history.clone(),
        interactions.clone(),
        locks.clone(),
    );

    let reward_config = bandit::RewardConfig {
        skip: config.skip_reward,
        neutral: config.neutral_reward,
    };
    let feedback = FeedbackProcessor::new(
        sessions.clone(),
        history,
        interactions,
        catalog.clone(),
        cache.clone(),
        locks,
        reward_config,
        config.alpha_min,
        config.alpha_max,
    );

    Ok(AppState {
        catalog,
        sessions,
        orchestrator,
        feedback,
        guard,
        cache,
        config,
        rate_limiter,
    })
}

fn router(state: AppState) -> Router {
    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/api/session", post(api::session::create_session))
        .route("/api/recommend/:session_id", get(api::recommend::recommend_one))
        .route("/api/recommendations/batch", post(api::recommend::recommend_batch))
        .route("/api/feedback", post(api::feedback::submit_feedback))
        .route("/api/feedback/batch", post(api::feedback::submit_feedback_batch))
        .route(
            "/api/feedback/status/:session_id/:product_id/:action",
            get(api::feedback::feedback_status),
        )
        .route(
            "/api/duplicate-detection/stats",
            get(api::admin::duplicate_detection_stats),
        )
        .route(
            "/api/duplicate-detection/reset",
            post(api::admin::duplicate_detection_reset),
        )
        .route("/api/cache/stats", get(api::admin::cache_stats))
        .route("/api/cache/clear", post(api::admin::cache_clear))
        .route(
            "/api/cache/invalidate/session/:session_id",
            post(api::admin::cache_invalidate_session),
        )
        .route("/api/metrics", get(api::observability::metrics))
        .route("/api/health", get(api::observability::api_health))
        .route("/health", get(api::observability::health))
        .route("/api/version", get(api::observability::api_version))
        .layer(axum_mw::from_fn_with_state(state.config.clone(), versioning::version_middleware))
        .layer(axum_mw::from_fn_with_state(state.rate_limiter.clone(), middleware::rate_limit_middleware))
        .layer(axum_mw::from_fn(middleware::request_logging))
        .layer(cors)
        .with_state(state)
}

/// Periodic maintenance: purge expired guard and rate-limit state so
/// process memory stays bounded (spec §5 "Cleanup tasks").
fn spawn_cleanup_task(guard: Arc<Guard>, rate_limiter: RateLimiter, enabled: bool, skip_in_production: bool, is_production: bool) {
    if !enabled || (skip_in_production && is_production) {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            guard.cleanup();
            rate_limiter.cleanup();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env()?);
    info!(port = config.port, host = %config.host, env = %config.node_env, "starting fashion recommendation backend");

    let state = build_state(config.clone()).await?;

    spawn_cleanup_task(
        state.guard.clone(),
        state.rate_limiter.clone(),
        config.enable_auto_cleanup,
        config.cleanup_skip_in_production,
        config.node_env == "production",
    );

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
