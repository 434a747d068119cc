//! C2 — LinUCB model.
//!
//! Per-session contextual bandit: score a feature vector and fold in a
//! reward (spec §4.2). The model is not persisted directly — it is always
//! reconstructible from `{alpha, dimensions, ordered interactions}`
//! (spec §3 "Model state", §9 "Model state storage").

use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::catalog::features::slot_label;
use crate::models::Interaction;

pub const REGULARIZATION: f64 = 0.01;
pub const ALPHA_DECAY: f64 = 0.95;
pub const ADAPTIVE_EXPLORATION_THRESHOLD: u32 = 10;

/// Reward mapping for the fixed action vocabulary, minus the two
/// configurable Open Questions (`skip`, `neutral` — spec §9).
#[derive(Debug, Clone, Copy)]
pub struct RewardConfig {
    pub skip: f64,
    pub neutral: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self { skip: 0.0, neutral: 0.0 }
    }
}

pub fn reward_for(action: crate::models::Action, cfg: &RewardConfig) -> f64 {
    use crate::models::Action::*;
    match action {
        Love => 2.0,
        Like => 1.0,
        Neutral => cfg.neutral,
        Skip => cfg.skip,
        Dislike => -1.0,
    }
}

/// The fitted per-session LinUCB state: `A`, `b`, and the derived `theta`.
#[derive(Debug, Clone)]
pub struct LinUcbState {
    pub dimensions: usize,
    pub alpha: f64,
    a: DMatrix<f64>,
    b: DVector<f64>,
    theta: DVector<f64>,
}

impl LinUcbState {
    /// Fresh model: `A = I * (1 + lambda)`, `b = 0`, `theta = 0`.
    pub fn new(dimensions: usize, alpha: f64) -> Self {
        let a = DMatrix::identity(dimensions, dimensions) * (1.0 + REGULARIZATION);
        let b = DVector::zeros(dimensions);
        let theta = DVector::zeros(dimensions);
        Self { dimensions, alpha, a, b, theta }
    }

    pub fn theta(&self) -> &DVector<f64> {
        &self.theta
    }

    fn invert(&self) -> Option<DMatrix<f64>> {
        self.a.clone().try_inverse()
    }

    /// Invert `A`, retrying once with `A + lambda*I` on failure, per the
    /// single-ladder decision recorded in DESIGN.md (spec §9 Open
    /// Questions: "Matrix inversion fallback ordering").
    fn invert_with_fallback(&self) -> Result<DMatrix<f64>, ModelError> {
        if let Some(inv) = self.invert() {
            return Ok(inv);
        }
        warn!("A matrix singular, retrying with regularization bump");
        let bumped = &self.a + DMatrix::identity(self.dimensions, self.dimensions) * REGULARIZATION;
        bumped.try_inverse().ok_or(ModelError::Singular)
    }

    fn to_vector(x: &[f64], dimensions: usize) -> DVector<f64> {
        debug_assert_eq!(x.len(), dimensions);
        DVector::from_row_slice(x)
    }

    pub fn expected_reward(&self, x: &[f64]) -> f64 {
        let xv = Self::to_vector(x, self.dimensions);
        self.theta.dot(&xv)
    }

    /// `alpha * sqrt(max(0, x^T A^-1 x))`.
    pub fn confidence(&self, x: &[f64]) -> Result<f64, ModelError> {
        let xv = Self::to_vector(x, self.dimensions);
        let a_inv = self.invert_with_fallback()?;
        let quad = (xv.transpose() * &a_inv * &xv)[(0, 0)];
        Ok(self.alpha * quad.max(0.0).sqrt())
    }

    pub fn ucb(&self, x: &[f64]) -> Result<f64, ModelError> {
        Ok(self.expected_reward(x) + self.confidence(x)?)
    }

    /// `A <- A + x x^T`; `b <- b + r*x`; `theta <- A^-1 b`.
    pub fn update(&mut self, x: &[f64], reward: f64) -> Result<(), ModelError> {
        let xv = Self::to_vector(x, self.dimensions);
        self.a += &xv * xv.transpose();
        self.b += reward * &xv;
        let a_inv = self.invert_with_fallback()?;
        self.theta = &a_inv * &self.b;
        Ok(())
    }

    pub fn norm(&self) -> f64 {
        self.theta.norm()
    }

    /// Rebuild a session's model state by replaying its ordered interaction
    /// log from scratch. Two independent replays of the same interaction
    /// list are required to agree to within 1e-9 (spec §8).
    pub fn replay(dimensions: usize, alpha: f64, interactions: &[Interaction]) -> Result<Self, ModelError> {
        let mut state = Self::new(dimensions, alpha);
        for i in interactions {
            let x: Vec<f64> = i.feature_vector.iter().map(|&b| b as f64).collect();
            state.update(&x, i.reward)?;
        }
        Ok(state)
    }

    /// Top-k positive and negative theta components, mapped back to slot
    /// names (spec §4.2 "Insights").
    pub fn top_components(&self, k: usize) -> (Vec<(String, f64)>, Vec<(String, f64)>) {
        let mut indexed: Vec<(usize, f64)> =
            self.theta.iter().enumerate().map(|(i, &v)| (i, v)).collect();

        let mut positive: Vec<(usize, f64)> =
            indexed.iter().cloned().filter(|(_, v)| *v > 0.0).collect();
        positive.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        positive.truncate(k);

        let mut negative: Vec<(usize, f64)> =
            indexed.drain(..).filter(|(_, v)| *v < 0.0).collect();
        negative.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        negative.truncate(k);

        let label = |idx: usize, val: f64| {
            let name = slot_label(idx)
                .map(|(slot, v)| format!("{slot}:{v}"))
                .unwrap_or_else(|| format!("dim:{idx}"));
            (name, val)
        };

        (
            positive.into_iter().map(|(i, v)| label(i, v)).collect(),
            negative.into_iter().map(|(i, v)| label(i, v)).collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelError {
    Singular,
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bandit model matrix could not be inverted")
    }
}

impl std::error::Error for ModelError {}

/// Confidence tier, a function of `total_interactions` and `||theta||`
/// (spec §4.2 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

pub fn confidence_tier(total_interactions: u32, theta_norm: f64) -> ConfidenceTier {
    if total_interactions >= 20 && theta_norm > 1.0 {
        ConfidenceTier::VeryHigh
    } else if total_interactions >= 10 && theta_norm > 0.5 {
        ConfidenceTier::High
    } else if total_interactions >= 5 && theta_norm > 0.3 {
        ConfidenceTier::Medium
    } else if total_interactions >= 3 {
        ConfidenceTier::Low
    } else {
        ConfidenceTier::VeryLow
    }
}

/// Adaptive exploration: once `total_interactions` crosses the threshold,
/// decay `alpha` toward `alpha_min`, never exceeding `alpha_max` (spec
/// §4.2 "Adaptive exploration").
pub fn decay_alpha(current: f64, total_interactions: u32, alpha_min: f64, alpha_max: f64) -> f64 {
    if total_interactions > ADAPTIVE_EXPLORATION_THRESHOLD {
        (current * ALPHA_DECAY).max(alpha_min).min(alpha_max)
    } else {
        current.min(alpha_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;

    fn unit_vec(dims: usize, idx: usize) -> Vec<f64> {
        let mut v = vec![0.0; dims];
        v[idx] = 1.0;
        v
    }

    #[test]
    fn reward_mapping_matches_spec_fixed_values() {
        let cfg = RewardConfig::default();
        assert_eq!(reward_for(Action::Love, &cfg), 2.0);
        assert_eq!(reward_for(Action::Like, &cfg), 1.0);
        assert_eq!(reward_for(Action::Dislike, &cfg), -1.0);
        assert_eq!(reward_for(Action::Skip, &cfg), 0.0);
        assert_eq!(reward_for(Action::Neutral, &cfg), 0.0);
    }

    #[test]
    fn configurable_skip_reward_is_honored() {
        let cfg = RewardConfig { skip: -0.5, neutral: 0.0 };
        assert_eq!(reward_for(Action::Skip, &cfg), -0.5);
    }

    #[test]
    fn positive_reward_is_monotonic() {
        let mut state = LinUcbState::new(4, 0.3);
        let x = unit_vec(4, 0);
        let before = state.ucb(&x).unwrap();
        state.update(&x, 2.0).unwrap();
        let after = state.ucb(&x).unwrap();
        assert!(after + 1e-9 >= before, "after={after} before={before}");
    }

    #[test]
    fn negative_reward_is_anti_monotonic() {
        let mut state = LinUcbState::new(4, 0.3);
        let x = unit_vec(4, 1);
        let before = state.ucb(&x).unwrap();
        state.update(&x, -1.0).unwrap();
        let after = state.ucb(&x).unwrap();
        assert!(after <= before + 1e-9, "after={after} before={before}");
    }

    #[test]
    fn replay_is_deterministic() {
        let dims = 4;
        let mut interactions = Vec::new();
        for (i, r) in [(0usize, 2.0), (1, -1.0), (0, 1.0)] {
            let mut fv = vec![0u8; dims];
            fv[i] = 1;
            interactions.push(Interaction {
                session_id: uuid::Uuid::new_v4(),
                product_id: "P".to_string(),
                action: Action::Love,
                reward: r,
                feature_vector: fv,
                score_before: 0.0,
                score_after: 0.0,
                timestamp: chrono::Utc::now(),
            });
        }

        let a = LinUcbState::replay(dims, 0.3, &interactions).unwrap();
        let b = LinUcbState::replay(dims, 0.3, &interactions).unwrap();
        for i in 0..dims {
            assert!((a.theta()[i] - b.theta()[i]).abs() <= 1e-9);
        }
    }

    #[test]
    fn alpha_decays_after_threshold_and_respects_floor() {
        let mut alpha = 0.3;
        for n in 11..40 {
            alpha = decay_alpha(alpha, n, 0.05, 2.0);
        }
        assert!(alpha >= 0.05);
        assert!(alpha < 0.3);
    }

    #[test]
    fn confidence_tiers_match_table() {
        assert_eq!(confidence_tier(25, 1.5), ConfidenceTier::VeryHigh);
        assert_eq!(confidence_tier(12, 0.6), ConfidenceTier::High);
        assert_eq!(confidence_tier(6, 0.4), ConfidenceTier::Medium);
        assert_eq!(confidence_tier(3, 0.0), ConfidenceTier::Low);
        assert_eq!(confidence_tier(0, 0.0), ConfidenceTier::VeryLow);
    }
}
