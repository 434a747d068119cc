//! C5 — Recommendation Orchestrator.
//!
//! `recommend(session_id, filters, count)`: resolve session, derive C4's
//! rules, fetch and score candidates, select, record (spec §4.5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::bandit::{confidence_tier, LinUcbState};
use crate::catalog::CatalogStore;
use crate::diversity::{
    avoidance_rules, build_candidate_filter, build_snapshot, exclusion_set, score_candidates,
    select_top_k, AvoidanceRules,
};
use crate::error::ApiError;
use crate::history::HistoryStore;
use crate::interactions::InteractionStore;
use crate::models::Product;
use crate::sessions::SessionStore;

/// Per-session mutex table enforcing the ordering guarantee of spec §5:
/// recommend and feedback calls on the same session serialize in arrival
/// order. Sessions are independent and fully parallel.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RecommendFilters {
    #[serde(rename = "minPrice", default)]
    pub min_price: Option<f64>,
    #[serde(rename = "maxPrice", default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RecommendedItem {
    pub product: Product,
    pub confidence_score: f64,
    pub base_score: f64,
    pub diversity_bonus: f64,
    pub exploration_bonus: f64,
    pub algorithm: &'static str,
    pub reasoning: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiversityInfo {
    pub avoided_categories: Vec<String>,
    pub avoided_colors: Vec<String>,
    pub avoided_brands: Vec<String>,
    pub exclusion_window_size: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserStats {
    pub total_interactions: u32,
    pub confidence_tier: crate::bandit::ConfidenceTier,
    pub alpha: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RecommendResult {
    pub items: Vec<RecommendedItem>,
    pub partial: bool,
    pub diversity_info: DiversityInfo,
    pub user_stats: UserStats,
}

#[derive(Clone)]
pub struct RecommendationOrchestrator {
    catalog: CatalogStore,
    sessions: SessionStore,
    history: HistoryStore,
    interactions: InteractionStore,
    locks: SessionLocks,
}

impl RecommendationOrchestrator {
    pub fn new(
        catalog: CatalogStore,
        sessions: SessionStore,
        history: HistoryStore,
        interactions: InteractionStore,
        locks: SessionLocks,
    ) -> Self {
        Self { catalog, sessions, history, interactions, locks }
    }

    pub async fn recommend(
        &self,
        session_id: Uuid,
        filters: RecommendFilters,
        count: usize,
    ) -> Result<RecommendResult, ApiError> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().await;

        let session = self
            .sessions
            .get(&session_id)
            .await?
            .ok_or(ApiError::SessionNotFound)?;
        if session.status == crate::models::SessionStatus::Inactive {
            return Err(ApiError::SessionInactive);
        }

        let history = self.history.get_history(&session_id, None).await?;

        let mut product_cache: HashMap<String, Product> = HashMap::new();
        let mut unique_ids: HashSet<&str> = HashSet::new();
        for h in &history {
            unique_ids.insert(h.product_id.as_str());
        }
        for id in unique_ids {
            if let Some(p) = self.catalog.get(id).await? {
                product_cache.insert(id.to_string(), p);
            }
        }
        let lookup = |id: &str| product_cache.get(id).cloned();

        let avoidance: AvoidanceRules = avoidance_rules(&history, &lookup);
        let excluded = exclusion_set(&history);
        let candidate_filter = build_candidate_filter(
            &avoidance,
            &excluded,
            filters.min_price,
            filters.max_price,
            filters.category.clone(),
        );

        let candidates = self.catalog.sample_candidates(&candidate_filter).await?;
        if candidates.is_empty() {
            return Err(ApiError::NoCandidates);
        }

        let snapshot = build_snapshot(&history, &lookup);
        let log = self.interactions.replay_log(&session_id).await?;
        let model = LinUcbState::replay(session.dimensions, session.alpha, &log)
            .map_err(|_| ApiError::ModelSingular)?;

        let scored = score_candidates(candidates, &model, &snapshot, session.total_interactions);
        if scored.is_empty() {
            return Err(ApiError::NoCandidates);
        }

        let scored_population = scored.len();
        let requested = count.max(1);
        let actual = requested.min(scored_population);
        let partial = requested > scored_population;

        let mut rng = rand::thread_rng();
        let selected = select_top_k(scored, actual, &mut rng);

        let mut items = Vec::with_capacity(selected.len());
        for candidate in &selected {
            self.history.record_shown(&session_id, &candidate.product.product_id).await?;

            let x: Vec<f64> = candidate.product.feature_vector.iter().map(|&b| b as f64).collect();
            let confidence_score = model.confidence(&x).map_err(|_| ApiError::ModelSingular)?;

            let reasoning = if session.total_interactions == 0 {
                "New session: recommendations are driven by exploration and diversity bonuses.".to_string()
            } else {
                let (positive, _) = model.top_components(1);
                match positive.first() {
                    Some((label, _)) => format!("Recommended based on your observed preference for {label}."),
                    None => "Recommended based on current model confidence and diversity.".to_string(),
                }
            };

            items.push(RecommendedItem {
                product: candidate.product.clone(),
                confidence_score,
                base_score: candidate.base_score,
                diversity_bonus: candidate.diversity_bonus,
                exploration_bonus: candidate.exploration_bonus,
                algorithm: "LinUCB",
                reasoning,
            });
        }

        let diversity_info = DiversityInfo {
            avoided_categories: avoidance.avoid_categories,
            avoided_colors: avoidance.avoid_colors,
            avoided_brands: avoidance.avoid_brands,
            exclusion_window_size: excluded.len(),
        };

        let user_stats = UserStats {
            total_interactions: session.total_interactions,
            confidence_tier: confidence_tier(session.total_interactions, model.norm()),
            alpha: session.alpha,
        };

        Ok(RecommendResult { items, partial, diversity_info, user_stats })
    }

    pub fn locks(&self) -> SessionLocks {
        self.locks.clone()
    }

    /// Current shown-history length for a session, used as the cache key's
    /// growth-sensitive component (C9).
    pub async fn history_len(&self, session_id: &Uuid) -> Result<usize, ApiError> {
        let history = self.history.get_history(session_id, None).await?;
        Ok(history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FeatureInput;
    use rusqlite::Connection;
    use tokio::sync::Mutex as TokioMutex;

    async fn setup() -> (RecommendationOrchestrator, Uuid) {
        let conn = Arc::new(TokioMutex::new(Connection::open_in_memory().unwrap()));
        let catalog = CatalogStore::new(conn.clone());
        let sessions = SessionStore::new(conn.clone());
        let history = HistoryStore::new(conn.clone());
        let interactions = InteractionStore::new(conn.clone());
        catalog.init_schema().await.unwrap();
        sessions.init_schema().await.unwrap();
        history.init_schema().await.unwrap();
        interactions.init_schema().await.unwrap();

        for i in 0..5 {
            let fv = crate::catalog::extract_features(&FeatureInput {
                category_main: "tops",
                primary_color: "black",
                occasion: Some("casual"),
                season: None,
                style: Some("classic"),
            });
            catalog
                .upsert(&Product {
                    product_id: format!("P{i}"),
                    brand: "Acme".to_string(),
                    category_main: "tops".to_string(),
                    primary_color: "black".to_string(),
                    price: 20.0,
                    occasion: Some("casual".to_string()),
                    season: None,
                    style: Some("classic".to_string()),
                    display_name: None,
                    image_url: None,
                    feature_vector: fv,
                })
                .await
                .unwrap();
        }

        let session = sessions.create("user-1", 0.3, 26).await.unwrap();
        let orchestrator = RecommendationOrchestrator::new(
            catalog,
            sessions,
            history,
            interactions,
            SessionLocks::new(),
        );
        (orchestrator, session.session_id)
    }

    #[tokio::test]
    async fn recommend_returns_one_item_by_default() {
        let (orchestrator, session_id) = setup().await;
        let result = orchestrator
            .recommend(session_id, RecommendFilters::default(), 1)
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(!result.partial);
    }

    #[tokio::test]
    async fn recommend_marks_partial_when_count_exceeds_population() {
        let (orchestrator, session_id) = setup().await;
        let result = orchestrator
            .recommend(session_id, RecommendFilters::default(), 100)
            .await
            .unwrap();
        assert!(result.partial);
        assert_eq!(result.items.len(), 5);
    }

    #[tokio::test]
    async fn recommend_missing_session_is_not_found() {
        let (orchestrator, _) = setup().await;
        let result = orchestrator
            .recommend(Uuid::new_v4(), RecommendFilters::default(), 1)
            .await;
        assert!(matches!(result, Err(ApiError::SessionNotFound)));
    }

    #[tokio::test]
    async fn recommend_avoids_recently_shown_products() {
        let (orchestrator, session_id) = setup().await;
        let mut seen = HashSet::new();
        for _ in 0..5 {
            let result = orchestrator
                .recommend(session_id, RecommendFilters::default(), 1)
                .await
                .unwrap();
            seen.insert(result.items[0].product.product_id.clone());
        }
        // Catalog has exactly 5 products and W_excl=20 > 5, so all 5 must
        // be distinct before any repeats.
        assert_eq!(seen.len(), 5);
    }
}
