//! Core domain entities (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed feature-vector width, `D` in the spec.
pub const FEATURE_DIMENSIONS: usize = 26;

/// A catalog product, immutable after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub product_id: String,
    pub brand: String,
    pub category_main: String,
    pub primary_color: String,
    pub price: f64,
    pub occasion: Option<String>,
    pub season: Option<String>,
    pub style: Option<String>,
    pub display_name: Option<String>,
    pub image_url: Option<String>,
    /// Cached feature vector, computed once at ingestion time (C1 is pure
    /// and total so this is always reconstructible, but caching it avoids
    /// recomputation on every candidate score).
    pub feature_vector: Vec<u8>,
}

/// The end-user action vocabulary (spec §6), strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Love,
    Like,
    Dislike,
    Skip,
    Neutral,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Love => "love",
            Action::Like => "like",
            Action::Dislike => "dislike",
            Action::Skip => "skip",
            Action::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "love" => Some(Action::Love),
            "like" => Some(Action::Like),
            "dislike" => Some(Action::Dislike),
            "skip" => Some(Action::Skip),
            "neutral" => Some(Action::Neutral),
            _ => None,
        }
    }

    /// Whether this action counts toward the "loved" subset used by C4's
    /// avoidance rules.
    pub fn is_loved(&self) -> bool {
        matches!(self, Action::Love)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
}

/// A per-user recommendation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: uuid::Uuid,
    pub user_id: String,
    pub alpha: f64,
    pub dimensions: usize,
    pub total_interactions: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a session's shown-product history (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub session_id: uuid::Uuid,
    pub product_id: String,
    pub shown_at: DateTime<Utc>,
    pub user_action: Option<Action>,
    pub action_timestamp: Option<DateTime<Utc>>,
}

/// A write-once reward event; the authoritative replay stream for C2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub session_id: uuid::Uuid,
    pub product_id: String,
    pub action: Action,
    pub reward: f64,
    pub feature_vector: Vec<u8>,
    pub score_before: f64,
    pub score_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// Retention cap on `session_history` entries per session (spec §3, `H_max`).
pub const H_MAX: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_str() {
        for a in [
            Action::Love,
            Action::Like,
            Action::Dislike,
            Action::Skip,
            Action::Neutral,
        ] {
            assert_eq!(Action::parse(a.as_str()), Some(a));
        }
    }

    #[test]
    fn unknown_action_rejected() {
        assert_eq!(Action::parse("meh"), None);
    }

    #[test]
    fn only_love_counts_as_loved() {
        assert!(Action::Love.is_loved());
        assert!(!Action::Like.is_loved());
        assert!(!Action::Neutral.is_loved());
    }
}
