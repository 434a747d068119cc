//! Application configuration, loaded once at startup from the environment.

use std::env;
use tracing::warn;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub host: String,
    pub node_env: String,
    pub cors_origins: Vec<String>,

    pub rate_limit_window_secs: u64,
    pub rate_limit_session_max: u32,
    pub rate_limit_recommend_max: u32,
    pub rate_limit_feedback_max: u32,
    pub rate_limit_batch_max: u32,
    pub rate_limit_general_max: u32,
    pub rate_limit_whitelist: Vec<String>,

    pub cache_enabled: bool,
    pub cache_max_size: usize,
    pub cache_ttl_ms: u64,

    pub enable_auto_cleanup: bool,
    pub cleanup_skip_in_production: bool,

    pub feature_dimensions: usize,
    pub enable_debug_routes: bool,

    pub alpha_min: f64,
    pub alpha_max: f64,
    pub alpha_default: f64,

    pub skip_reward: f64,
    pub neutral_reward: f64,

    pub catalog_csv_path: Option<String>,

    pub api_version_default: u32,
    pub api_versions_supported: Vec<u32>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!(key, value = %v, "invalid env value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let skip_reward: f64 = env_or("SKIP_REWARD", 0.0);
        let neutral_reward: f64 = env_or("NEUTRAL_REWARD", 0.0);

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./fashion_reco.db".to_string()),
            port: env_or("PORT", 8080),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            node_env: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
            cors_origins: env_list("CORS_ORIGINS", &[]),

            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_session_max: env_or("RATE_LIMIT_SESSION_MAX", 5),
            rate_limit_recommend_max: env_or("RATE_LIMIT_RECOMMEND_MAX", 30),
            rate_limit_feedback_max: env_or("RATE_LIMIT_FEEDBACK_MAX", 50),
            rate_limit_batch_max: env_or("RATE_LIMIT_BATCH_MAX", 10),
            rate_limit_general_max: env_or("RATE_LIMIT_GENERAL_MAX", 100),
            rate_limit_whitelist: env_list("RATE_LIMIT_WHITELIST", &[]),

            cache_enabled: env_or("CACHE_ENABLED", true),
            cache_max_size: env_or("CACHE_MAX_SIZE", 1000),
            cache_ttl_ms: env_or("CACHE_TTL_MS", 300_000),

            enable_auto_cleanup: env_or("ENABLE_AUTO_CLEANUP", true),
            cleanup_skip_in_production: env_or("CLEANUP_SKIP_IN_PRODUCTION", false),

            feature_dimensions: env_or("FEATURE_DIMENSIONS", 26),
            enable_debug_routes: env_or("ENABLE_DEBUG_ROUTES", false),

            alpha_min: env_or("ALPHA_MIN", 0.05),
            alpha_max: env_or("ALPHA_MAX", 2.0),
            alpha_default: env_or("ALPHA_DEFAULT", 0.3),

            skip_reward,
            neutral_reward,

            catalog_csv_path: env::var("CATALOG_CSV_PATH").ok(),

            api_version_default: env_or("API_VERSION_DEFAULT", 1),
            api_versions_supported: env_list("API_VERSIONS_SUPPORTED", &["1"])
                .into_iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_env() {
        // env_or falls back cleanly even when the var is absent.
        let window: u64 = env_or("FASHION_RECO_TEST_NONEXISTENT_VAR", 60);
        assert_eq!(window, 60);
    }

    #[test]
    fn env_list_splits_and_trims() {
        std::env::set_var("FASHION_RECO_TEST_LIST", "a, b ,c");
        assert_eq!(
            env_list("FASHION_RECO_TEST_LIST", &[]),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        std::env::remove_var("FASHION_RECO_TEST_LIST");
    }
}
