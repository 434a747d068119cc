//! C6 — Feedback Processor.
//!
//! `feedback(session_id, product_id, action, idempotency_key?)`: idempotent
//! mutation of session history, interaction log, and model state (spec
//! §4.6). Guard dedup (C7 step 1) and cache invalidation (C9) happen
//! around this processor at the API handler layer and inside `process`
//! respectively; the per-session lock is shared with C5 so the two
//! operation families serialize on a session (spec §5).

use tracing::error;
use uuid::Uuid;

use crate::bandit::{decay_alpha, reward_for, LinUcbState, RewardConfig};
use crate::cache::RecommendationCache;
use crate::catalog::CatalogStore;
use crate::diversity::avoidance_rules;
use crate::error::ApiError;
use crate::history::HistoryStore;
use crate::interactions::InteractionStore;
use crate::models::{Action, Interaction};
use crate::orchestrator::SessionLocks;
use crate::sessions::SessionStore;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LearningUpdate {
    pub reward: f64,
    pub alpha_before: f64,
    pub alpha_after: f64,
    pub total_interactions: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoreEvolution {
    pub score_before: f64,
    pub score_after: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserInsights {
    pub top_positive: Vec<(String, f64)>,
    pub top_negative: Vec<(String, f64)>,
    pub confidence_tier: crate::bandit::ConfidenceTier,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiversityStats {
    pub avoided_categories: Vec<String>,
    pub avoided_colors: Vec<String>,
    pub avoided_brands: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedbackResult {
    pub learning_update: LearningUpdate,
    pub user_insights: UserInsights,
    pub diversity_stats: DiversityStats,
    pub score_evolution: ScoreEvolution,
}

#[derive(Clone)]
pub struct FeedbackProcessor {
    sessions: SessionStore,
    history: HistoryStore,
    interactions: InteractionStore,
    catalog: CatalogStore,
    cache: std::sync::Arc<RecommendationCache>,
    locks: SessionLocks,
    reward_config: RewardConfig,
    alpha_min: f64,
    alpha_max: f64,
}

impl FeedbackProcessor {
    pub fn new(
        sessions: SessionStore,
        history: HistoryStore,
        interactions: InteractionStore,
        catalog: CatalogStore,
        cache: std::sync::Arc<RecommendationCache>,
        locks: SessionLocks,
        reward_config: RewardConfig,
        alpha_min: f64,
        alpha_max: f64,
    ) -> Self {
        Self {
            sessions,
            history,
            interactions,
            catalog,
            cache,
            locks,
            reward_config,
            alpha_min,
            alpha_max,
        }
    }

    pub async fn process(
        &self,
        session_id: Uuid,
        product_id: &str,
        action: Action,
    ) -> Result<FeedbackResult, ApiError> {
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

        let product = self
            .catalog
            .get(product_id)
            .await?
            .ok_or(ApiError::ProductNotFound)?;

        if product.feature_vector.len() != session.dimensions {
            return Err(ApiError::Validation {
                message: "product feature vector does not match session dimensions".to_string(),
                details: None,
            });
        }
        let x: Vec<f64> = product.feature_vector.iter().map(|&b| b as f64).collect();

        // Steps 4-6 must commit together (spec §5, §7 recovery policy):
        // once set_action lands, a failure to append the interaction is
        // compensated by clearing it back out.
        let updated = self.history.set_action(&session_id, product_id, action).await?;
        if !updated {
            tracing::warn!(%session_id, product_id, "feedback for a product never shown to this session");
        }

        let log = self.interactions.replay_log(&session_id).await?;
        let mut model = LinUcbState::replay(session.dimensions, session.alpha, &log)
            .map_err(|_| ApiError::ModelSingular)?;
        let score_before = model.ucb(&x).map_err(|_| ApiError::ModelSingular)?;

        let reward = reward_for(action, &self.reward_config);
        if let Err(e) = model.update(&x, reward) {
            let _ = self.history.clear_action(&session_id, product_id).await;
            error!(%session_id, product_id, %e, "model update failed, compensated history action");
            return Err(ApiError::ModelSingular);
        }
        let score_after = model.ucb(&x).map_err(|_| ApiError::ModelSingular)?;

        let interaction = Interaction {
            session_id,
            product_id: product_id.to_string(),
            action,
            reward,
            feature_vector: product.feature_vector.clone(),
            score_before,
            score_after,
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = self.interactions.append(&interaction).await {
            let _ = self.history.clear_action(&session_id, product_id).await;
            error!(%session_id, product_id, %e, "interaction append failed, compensated history action");
            return Err(e.into());
        }

        let new_total = session.total_interactions + 1;
        let new_alpha = decay_alpha(session.alpha, new_total, self.alpha_min, self.alpha_max);
        self.sessions.record_interaction(&session_id, new_alpha).await?;

        self.cache.invalidate_session(session_id);

        let history = self.history.get_history(&session_id, None).await?;
        let diversity = self.diversity_stats(&history).await?;

        let (top_positive, top_negative) = model.top_components(3);

        Ok(FeedbackResult {
            learning_update: LearningUpdate {
                reward,
                alpha_before: session.alpha,
                alpha_after: new_alpha,
                total_interactions: new_total,
            },
            user_insights: UserInsights {
                top_positive,
                top_negative,
                confidence_tier: crate::bandit::confidence_tier(new_total, model.norm()),
            },
            diversity_stats: DiversityStats {
                avoided_categories: diversity.avoid_categories,
                avoided_colors: diversity.avoid_colors,
                avoided_brands: diversity.avoid_brands,
            },
            score_evolution: ScoreEvolution { score_before, score_after, delta: score_after - score_before },
        })
    }

    async fn diversity_stats(
        &self,
        history: &[crate::models::SessionHistoryEntry],
    ) -> Result<crate::diversity::AvoidanceRules, ApiError> {
        let mut cache = std::collections::HashMap::new();
        let mut ids = std::collections::HashSet::new();
        for h in history {
            ids.insert(h.product_id.as_str());
        }
        for id in ids {
            if let Some(p) = self.catalog.get(id).await? {
                cache.insert(id.to_string(), p);
            }
        }
        let lookup = |id: &str| cache.get(id).cloned();
        Ok(avoidance_rules(history, &lookup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FeatureInput;
    use crate::models::Product;
    use rusqlite::Connection;
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    async fn setup() -> (FeedbackProcessor, Uuid) {
        let conn = Arc::new(TokioMutex::new(Connection::open_in_memory().unwrap()));
        let catalog = CatalogStore::new(conn.clone());
        let sessions = SessionStore::new(conn.clone());
        let history = HistoryStore::new(conn.clone());
        let interactions = InteractionStore::new(conn.clone());
        catalog.init_schema().await.unwrap();
        sessions.init_schema().await.unwrap();
        history.init_schema().await.unwrap();
        interactions.init_schema().await.unwrap();

        let fv = crate::catalog::extract_features(&FeatureInput {
            category_main: "tops",
            primary_color: "black",
            occasion: Some("casual"),
            season: None,
            style: Some("classic"),
        });
        catalog
            .upsert(&Product {
                product_id: "P1".to_string(),
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

        let session = sessions.create("user-1", 0.3, 26).await.unwrap();
        history.record_shown(&session.session_id, "P1").await.unwrap();

        let cache = Arc::new(RecommendationCache::new(100, std::time::Duration::from_secs(300)));
        let processor = FeedbackProcessor::new(
            sessions,
            history,
            interactions,
            catalog,
            cache,
            SessionLocks::new(),
            RewardConfig::default(),
            0.05,
            2.0,
        );
        (processor, session.session_id)
    }

    #[tokio::test]
    async fn feedback_increments_total_interactions_and_scores() {
        let (processor, session_id) = setup().await;
        let result = processor.process(session_id, "P1", Action::Love).await.unwrap();
        assert_eq!(result.learning_update.total_interactions, 1);
        assert_eq!(result.learning_update.reward, 2.0);
        assert!(result.score_evolution.score_after >= result.score_evolution.score_before);
    }

    #[tokio::test]
    async fn feedback_missing_session_is_not_found() {
        let (processor, _) = setup().await;
        let result = processor.process(Uuid::new_v4(), "P1", Action::Love).await;
        assert!(matches!(result, Err(ApiError::SessionNotFound)));
    }

    #[tokio::test]
    async fn feedback_missing_product_is_not_found() {
        let (processor, session_id) = setup().await;
        let result = processor.process(session_id, "missing", Action::Love).await;
        assert!(matches!(result, Err(ApiError::ProductNotFound)));
    }

    #[tokio::test]
    async fn feedback_invalidates_cache_for_session() {
        let (processor, session_id) = setup().await;
        let key = crate::cache::RecommendationCache::key(
            session_id,
            &crate::orchestrator::RecommendFilters::default(),
            1,
            1,
        );
        processor.cache.put(
            session_id,
            key,
            crate::orchestrator::RecommendResult {
                items: vec![],
                partial: false,
                diversity_info: crate::orchestrator::DiversityInfo {
                    avoided_categories: vec![],
                    avoided_colors: vec![],
                    avoided_brands: vec![],
                    exclusion_window_size: 0,
                },
                user_stats: crate::orchestrator::UserStats {
                    total_interactions: 0,
                    confidence_tier: crate::bandit::ConfidenceTier::VeryLow,
                    alpha: 0.3,
                },
            },
        );
        processor.process(session_id, "P1", Action::Like).await.unwrap();
        assert!(processor.cache.get(key).is_none());
    }
}
