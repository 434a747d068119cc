//! C4 — Diversity Controller.
//!
//! Turns a session's shown/loved history into an exclusion set, avoidance
//! rules, and per-candidate bonuses, then makes the final stochastic pick
//! (spec §4.4). Pure with respect to persistence: callers supply `H` and
//! the candidate pool; nothing here touches a store directly.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::bandit::LinUcbState;
use crate::catalog::CandidateFilter;
use crate::models::{Product, SessionHistoryEntry};

pub const W_EXCL: usize = 20;
pub const AVOIDANCE_WINDOW: usize = 10;
pub const CATEGORY_AVOID_LIMIT: usize = 3;
pub const COLOR_AVOID_LIMIT: usize = 2;
pub const BRAND_AVOID_LIMIT: usize = 3;
pub const K_TOP: usize = 5;

/// The snapshot of facets the user has already seen, used by the
/// diversity bonus. "Seen" means shown, loved or not.
#[derive(Debug, Clone, Default)]
pub struct UserPreferenceSnapshot {
    pub seen_categories: HashSet<String>,
    pub seen_colors: HashSet<String>,
    pub seen_brands: HashSet<String>,
}

/// Facet values to steer the candidate query away from (spec §4.4
/// "Avoidance rules").
#[derive(Debug, Clone, Default)]
pub struct AvoidanceRules {
    pub avoid_categories: Vec<String>,
    pub avoid_colors: Vec<String>,
    pub avoid_brands: Vec<String>,
}

/// `E`: product ids forbidden as candidates because they were shown within
/// the last `W_excl` history entries (newest-first `history`).
pub fn exclusion_set(history: &[SessionHistoryEntry]) -> HashSet<String> {
    history
        .iter()
        .take(W_EXCL)
        .map(|h| h.product_id.clone())
        .collect()
}

/// Build the user-preference snapshot from the full retained history.
pub fn build_snapshot(history: &[SessionHistoryEntry], products: &dyn Fn(&str) -> Option<Product>) -> UserPreferenceSnapshot {
    let mut snapshot = UserPreferenceSnapshot::default();
    for h in history {
        if let Some(p) = products(&h.product_id) {
            snapshot.seen_categories.insert(p.category_main);
            snapshot.seen_colors.insert(p.primary_color);
            snapshot.seen_brands.insert(p.brand);
        }
    }
    snapshot
}

/// Examine only the loved subset of the `AVOIDANCE_WINDOW` most recent
/// history entries; mark a facet value "avoid" once its loved count meets
/// its limit.
pub fn avoidance_rules(
    history: &[SessionHistoryEntry],
    products: &dyn Fn(&str) -> Option<Product>,
) -> AvoidanceRules {
    use std::collections::HashMap;

    let mut category_counts: HashMap<String, usize> = HashMap::new();
    let mut color_counts: HashMap<String, usize> = HashMap::new();
    let mut brand_counts: HashMap<String, usize> = HashMap::new();

    for h in history.iter().take(AVOIDANCE_WINDOW) {
        let loved = h.user_action.map(|a| a.is_loved()).unwrap_or(false);
        if !loved {
            continue;
        }
        let Some(p) = products(&h.product_id) else { continue };
        *category_counts.entry(p.category_main).or_insert(0) += 1;
        *color_counts.entry(p.primary_color).or_insert(0) += 1;
        *brand_counts.entry(p.brand).or_insert(0) += 1;
    }

    let pick = |counts: HashMap<String, usize>, limit: usize| -> Vec<String> {
        counts
            .into_iter()
            .filter(|(_, n)| *n >= limit)
            .map(|(k, _)| k)
            .collect()
    };

    AvoidanceRules {
        avoid_categories: pick(category_counts, CATEGORY_AVOID_LIMIT),
        avoid_colors: pick(color_counts, COLOR_AVOID_LIMIT),
        avoid_brands: pick(brand_counts, BRAND_AVOID_LIMIT),
    }
}

/// Fold avoidance rules, the exclusion set, and the caller's own filters
/// into one `CandidateFilter` for `CatalogStore::sample_candidates`.
pub fn build_candidate_filter(
    avoidance: &AvoidanceRules,
    excluded: &HashSet<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    category: Option<String>,
) -> CandidateFilter {
    CandidateFilter {
        min_price,
        max_price,
        category,
        avoid_categories: avoidance.avoid_categories.clone(),
        avoid_colors: avoidance.avoid_colors.clone(),
        avoid_brands: avoidance.avoid_brands.clone(),
        exclude_product_ids: excluded.clone(),
    }
}

/// One scored candidate, carried through selection.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub product: Product,
    pub base_score: f64,
    pub diversity_bonus: f64,
    pub exploration_bonus: f64,
    pub final_score: f64,
}

/// `diversity_bonus = 0.20*[category new] + 0.15*[color new] + 0.10*[brand new]`.
pub fn diversity_bonus(product: &Product, snapshot: &UserPreferenceSnapshot) -> f64 {
    let mut bonus = 0.0;
    if !snapshot.seen_categories.contains(&product.category_main) {
        bonus += 0.20;
    }
    if !snapshot.seen_colors.contains(&product.primary_color) {
        bonus += 0.15;
    }
    if !snapshot.seen_brands.contains(&product.brand) {
        bonus += 0.10;
    }
    bonus
}

/// `max(0.05, 0.30 - 0.01*total_interactions)`.
pub fn exploration_bonus(total_interactions: u32) -> f64 {
    (0.30 - 0.01 * total_interactions as f64).max(0.05)
}

/// Score every candidate with a valid feature vector. Candidates whose
/// cached vector length doesn't match the model's dimensions are dropped
/// with a warning (spec §4.5 step 6).
pub fn score_candidates(
    candidates: Vec<Product>,
    model: &LinUcbState,
    snapshot: &UserPreferenceSnapshot,
    total_interactions: u32,
) -> Vec<ScoredCandidate> {
    let expl = exploration_bonus(total_interactions);
    let mut scored = Vec::with_capacity(candidates.len());

    for product in candidates {
        if product.feature_vector.len() != model.dimensions {
            tracing::warn!(
                product_id = %product.product_id,
                expected = model.dimensions,
                actual = product.feature_vector.len(),
                "dropping candidate with invalid feature vector"
            );
            continue;
        }

        let x: Vec<f64> = product.feature_vector.iter().map(|&b| b as f64).collect();
        let base_score = match model.ucb(&x) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(product_id = %product.product_id, error = %e, "dropping candidate, model error");
                continue;
            }
        };
        let div = diversity_bonus(&product, snapshot);
        let final_score = base_score + div + expl;

        scored.push(ScoredCandidate {
            product,
            base_score,
            diversity_bonus: div,
            exploration_bonus: expl,
            final_score,
        });
    }

    scored
}

/// Sort by `final_score` descending, then uniformly pick `count` distinct
/// items from the top `max(K_top, count)` pool (spec §4.4 "Selection").
/// Returns as many as are available when `count` exceeds the scored
/// population (spec §4.5 edge case).
pub fn select_top_k(mut scored: Vec<ScoredCandidate>, count: usize, rng: &mut impl Rng) -> Vec<ScoredCandidate> {
    scored.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());

    let pool_size = K_TOP.max(count).min(scored.len());
    let mut pool: Vec<ScoredCandidate> = scored.drain(..pool_size).collect();
    pool.shuffle(rng);
    pool.truncate(count);
    pool
}
