//! C8 — Rate Limiter.
//!
//! Per-source-IP sliding window, one bucket per endpoint class (spec
//! §4.8). A static IP whitelist bypasses all classes.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Session,
    Recommend,
    Feedback,
    Batch,
    General,
}

impl EndpointClass {
    pub fn label(&self) -> &'static str {
        match self {
            EndpointClass::Session => "session",
            EndpointClass::Recommend => "recommend",
            EndpointClass::Feedback => "feedback",
            EndpointClass::Batch => "batch",
            EndpointClass::General => "general",
        }
    }
}

/// Classify a request path into one of the five rate-limit buckets (spec
/// §4.8 table). Batch paths are checked before their singular
/// counterparts since `/api/feedback/batch` would otherwise match the
/// `feedback` prefix first.
pub fn classify_path(path: &str) -> EndpointClass {
    if path.contains("batch") {
        EndpointClass::Batch
    } else if path.starts_with("/api/session") {
        EndpointClass::Session
    } else if path.starts_with("/api/recommend") || path.starts_with("/api/recommendations") {
        EndpointClass::Recommend
    } else if path.starts_with("/api/feedback") {
        EndpointClass::Feedback
    } else {
        EndpointClass::General
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub limits: HashMap<EndpointClass, u32>,
    pub whitelist: HashSet<IpAddr>,
}

impl RateLimitConfig {
    pub fn from_app_config(cfg: &crate::config::Config) -> Self {
        let mut limits = HashMap::new();
        limits.insert(EndpointClass::Session, cfg.rate_limit_session_max);
        limits.insert(EndpointClass::Recommend, cfg.rate_limit_recommend_max);
        limits.insert(EndpointClass::Feedback, cfg.rate_limit_feedback_max);
        limits.insert(EndpointClass::Batch, cfg.rate_limit_batch_max);
        limits.insert(EndpointClass::General, cfg.rate_limit_general_max);

        let whitelist = cfg
            .rate_limit_whitelist
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

        Self {
            window: Duration::from_secs(cfg.rate_limit_window_secs),
            limits,
            whitelist,
        }
    }

    fn limit_for(&self, class: EndpointClass) -> u32 {
        self.limits.get(&class).copied().unwrap_or(100)
    }
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

pub enum RateLimitResult {
    Allowed { limit: u32, remaining: u32 },
    Exceeded { limit: u32, retry_after: Duration },
}

#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    state: Arc<Mutex<HashMap<(IpAddr, EndpointClass), WindowEntry>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config: Arc::new(config), state: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn check(&self, ip: IpAddr, class: EndpointClass) -> RateLimitResult {
        if self.config.whitelist.contains(&ip) {
            return RateLimitResult::Allowed { limit: u32::MAX, remaining: u32::MAX };
        }

        let limit = self.config.limit_for(class);
        let mut state = self.state.lock();
        let now = Instant::now();
        let entry = state
            .entry((ip, class))
            .or_insert_with(|| WindowEntry { count: 0, window_start: now });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        if entry.count > limit {
            let reset_at = entry.window_start + self.config.window;
            RateLimitResult::Exceeded { limit, retry_after: reset_at.saturating_duration_since(now) }
        } else {
            RateLimitResult::Allowed { limit, remaining: limit.saturating_sub(entry.count) }
        }
    }

    /// Called from a 60 s maintenance task (spec §5 "Cleanup tasks").
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    let class = classify_path(request.uri().path());

    match limiter.check(ip, class) {
        RateLimitResult::Allowed { .. } => next.run(request).await,
        RateLimitResult::Exceeded { limit, retry_after } => {
            warn!(ip = %ip, class = class.label(), retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
            let reset_at = Utc::now() + chrono::Duration::seconds(retry_after.as_secs() as i64);
            let body = serde_json::json!({
                "success": false,
                "error": "rate_limited",
                "message": "rate limit exceeded",
                "retry_after_seconds": retry_after.as_secs(),
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("Retry-After", retry_after.as_secs().to_string()),
                    ("X-RateLimit-Limit", limit.to_string()),
                    ("X-RateLimit-Remaining", "0".to_string()),
                    ("X-RateLimit-Reset", reset_at.to_rfc3339()),
                ],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limit: u32) -> RateLimitConfig {
        let mut limits = HashMap::new();
        limits.insert(EndpointClass::General, limit);
        RateLimitConfig { window: Duration::from_secs(60), limits, whitelist: HashSet::new() }
    }

    #[test]
    fn classify_matches_spec_table() {
        assert_eq!(classify_path("/api/session"), EndpointClass::Session);
        assert_eq!(classify_path("/api/recommend/abc"), EndpointClass::Recommend);
        assert_eq!(classify_path("/api/recommendations/batch"), EndpointClass::Batch);
        assert_eq!(classify_path("/api/feedback"), EndpointClass::Feedback);
        assert_eq!(classify_path("/api/feedback/batch"), EndpointClass::Batch);
        assert_eq!(classify_path("/api/health"), EndpointClass::General);
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(config(3));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..3 {
            assert!(matches!(limiter.check(ip, EndpointClass::General), RateLimitResult::Allowed { .. }));
        }
        assert!(matches!(limiter.check(ip, EndpointClass::General), RateLimitResult::Exceeded { .. }));
    }

    #[test]
    fn whitelisted_ip_always_allowed() {
        let mut cfg = config(1);
        cfg.whitelist.insert("127.0.0.1".parse().unwrap());
        let limiter = RateLimiter::new(cfg);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(matches!(limiter.check(ip, EndpointClass::General), RateLimitResult::Allowed { .. }));
        }
    }

    #[test]
    fn classes_have_independent_buckets() {
        let mut limits = HashMap::new();
        limits.insert(EndpointClass::Session, 1);
        limits.insert(EndpointClass::Recommend, 1);
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            limits,
            whitelist: HashSet::new(),
        });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(matches!(limiter.check(ip, EndpointClass::Session), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check(ip, EndpointClass::Recommend), RateLimitResult::Allowed { .. }));
    }
}
