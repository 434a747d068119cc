//! C7 — Idempotency & Conflict Guard.
//!
//! Three process-local, TTL-bounded tables (spec §3 "Guard state", §4.7):
//! a general request-fingerprint dedup table, a feedback-specific
//! `(session, product)` conflict table, and an idempotency-key response
//! cache. The feedback table is keyed on `(session, product)` rather than
//! the full `(session, product, action)` triple: §8 S2/S3 require the
//! rapid/same-window guard to fire when the *action changes* for the same
//! product within the window (`like` then `love` 1s later ⇒
//! `rapid_feedback`; `dislike` 7s later ⇒ `feedback_conflict`), so the
//! action cannot be part of the key. Guarded by `dashmap` for
//! fine-grained, lock-free-ish concurrent access per key (spec §5
//! "Guard-table accesses are independent per key").

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::models::Action;

pub const W_GEN: Duration = Duration::from_secs(30);
pub const W_RAPID: Duration = Duration::from_secs(5);
pub const W_SAME: Duration = Duration::from_secs(60);
pub const W_IDEM: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FeedbackKey {
    session_id: Uuid,
    product_id: String,
}

#[derive(Debug, Clone)]
struct FeedbackRecord {
    recorded_at: Instant,
    last_action: Action,
    idempotency_key: Option<String>,
    processed: bool,
}

#[derive(Debug, Clone)]
pub struct IdempotentEntry {
    pub status: u16,
    pub body: Value,
    pub recorded_at: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedbackStatus {
    pub processed: bool,
    pub seconds_since_recorded: u64,
    pub has_idempotency_key: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GuardStats {
    pub fingerprint_entries: usize,
    pub feedback_entries: usize,
    pub idempotency_entries: usize,
}

#[derive(Debug, Clone)]
pub enum GuardDecision {
    Allow,
    IdempotentReplay(IdempotentEntry),
    Duplicate { retry_after_secs: u64 },
    RapidFeedback { retry_after_secs: u64 },
    FeedbackConflict { retry_after_secs: u64 },
}

#[derive(Default)]
pub struct Guard {
    fingerprints: DashMap<u64, Instant>,
    feedback: DashMap<FeedbackKey, FeedbackRecord>,
    idempotency: DashMap<String, IdempotentEntry>,
}

impl Guard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `hash(ip, method, path, canonical(body), canonical(query))`.
    /// `serde_json::Value`'s object map is a `BTreeMap` (no
    /// `preserve_order` feature enabled), so `to_string()` is already a
    /// stable, key-sorted canonical form.
    pub fn fingerprint(ip: &str, method: &str, path: &str, body: &Value, query: &Value) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        ip.hash(&mut hasher);
        method.hash(&mut hasher);
        path.hash(&mut hasher);
        body.to_string().hash(&mut hasher);
        query.to_string().hash(&mut hasher);
        hasher.finish()
    }

    /// Full precedence check for a feedback request (spec §4.7, steps 1-3).
    pub fn check_feedback(
        &self,
        fingerprint: u64,
        session_id: Uuid,
        product_id: &str,
        _action: Action,
        idempotency_key: Option<&str>,
    ) -> GuardDecision {
        if let Some(key) = idempotency_key {
            if let Some(entry) = self.idempotency.get(key) {
                if entry.recorded_at.elapsed() < W_IDEM {
                    return GuardDecision::IdempotentReplay(entry.clone());
                }
            }
        }

        let fkey = FeedbackKey { session_id, product_id: product_id.to_string() };
        if let Some(rec) = self.feedback.get(&fkey) {
            let same_key = idempotency_key.is_some()
                && rec.idempotency_key.as_deref() == idempotency_key;
            if !same_key {
                let elapsed = rec.recorded_at.elapsed();
                if elapsed < W_RAPID {
                    return GuardDecision::RapidFeedback {
                        retry_after_secs: (W_RAPID - elapsed).as_secs().max(1),
                    };
                }
                if elapsed < W_SAME {
                    return GuardDecision::FeedbackConflict {
                        retry_after_secs: (W_SAME - elapsed).as_secs().max(1),
                    };
                }
                // Beyond W_same: the user is permitted to change their mind.
            }
            // Same idempotency key within any window: allowed (the
            // duplicate itself is handled by the step-1 replay path above).
        }

        if let Some(ts) = self.fingerprints.get(&fingerprint) {
            if ts.elapsed() < W_GEN {
                return GuardDecision::Duplicate {
                    retry_after_secs: (W_GEN - ts.elapsed()).as_secs().max(1),
                };
            }
        }

        GuardDecision::Allow
    }

    /// Step 3 only, for non-feedback mutating endpoints (session creation,
    /// batch wrappers, admin actions).
    pub fn check_general(&self, fingerprint: u64, idempotency_key: Option<&str>) -> GuardDecision {
        if let Some(key) = idempotency_key {
            if let Some(entry) = self.idempotency.get(key) {
                if entry.recorded_at.elapsed() < W_IDEM {
                    return GuardDecision::IdempotentReplay(entry.clone());
                }
            }
        }
        if let Some(ts) = self.fingerprints.get(&fingerprint) {
            if ts.elapsed() < W_GEN {
                return GuardDecision::Duplicate {
                    retry_after_secs: (W_GEN - ts.elapsed()).as_secs().max(1),
                };
            }
        }
        GuardDecision::Allow
    }

    /// On pass: record the fingerprint and the feedback key with
    /// `processed=false` (spec §4.7 "On pass").
    pub fn record_feedback_pass(
        &self,
        fingerprint: u64,
        session_id: Uuid,
        product_id: &str,
        action: Action,
        idempotency_key: Option<String>,
    ) {
        self.fingerprints.insert(fingerprint, Instant::now());
        self.feedback.insert(
            FeedbackKey { session_id, product_id: product_id.to_string() },
            FeedbackRecord { recorded_at: Instant::now(), last_action: action, idempotency_key, processed: false },
        );
    }

    pub fn record_general_pass(&self, fingerprint: u64) {
        self.fingerprints.insert(fingerprint, Instant::now());
    }

    /// `action` is the action just processed for this `(session, product)`;
    /// the guard table holds one record per product, so this is a no-op if
    /// a later feedback call already overwrote it with a different action.
    pub fn mark_processed(&self, session_id: Uuid, product_id: &str, action: Action) {
        let fkey = FeedbackKey { session_id, product_id: product_id.to_string() };
        if let Some(mut rec) = self.feedback.get_mut(&fkey) {
            if rec.last_action == action {
                rec.processed = true;
            }
        }
    }

    pub fn store_idempotent_response(&self, key: String, status: u16, body: Value) {
        self.idempotency.insert(key, IdempotentEntry { status, body, recorded_at: Instant::now() });
    }

    /// `None` if there is no record for this product, or the most recent
    /// recorded action differs from the one queried.
    pub fn status(&self, session_id: Uuid, product_id: &str, action: Action) -> Option<FeedbackStatus> {
        let fkey = FeedbackKey { session_id, product_id: product_id.to_string() };
        self.feedback.get(&fkey).and_then(|rec| {
            if rec.last_action != action {
                return None;
            }
            Some(FeedbackStatus {
                processed: rec.processed,
                seconds_since_recorded: rec.recorded_at.elapsed().as_secs(),
                has_idempotency_key: rec.idempotency_key.is_some(),
            })
        })
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            fingerprint_entries: self.fingerprints.len(),
            feedback_entries: self.feedback.len(),
            idempotency_entries: self.idempotency.len(),
        }
    }

    /// Dev-only reset (`POST /api/duplicate-detection/reset`).
    pub fn reset(&self) {
        self.fingerprints.clear();
        self.feedback.clear();
        self.idempotency.clear();
    }

    /// Purge entries past their window, ×2 for feedback records to give a
    /// grace tail for status queries (spec §4.7). Run every 60s.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.fingerprints.retain(|_, ts| now.duration_since(*ts) < W_GEN * 2);
        self.feedback.retain(|_, rec| now.duration_since(rec.recorded_at) < W_SAME * 2);
        self.idempotency.retain(|_, e| now.duration_since(e.recorded_at) < W_IDEM * 2);
    }
}

/// Intra-batch duplicate detection on `(session, product)` (spec §4.7
/// "Batch-feedback endpoints must additionally detect intra-batch
/// duplicates"), mirroring the re-keyed feedback guard table above: two
/// items addressing the same product within a batch conflict regardless
/// of which action each one carries (§8 S6: `{A,like}` then `{A,love}`
/// conflict even though the actions differ). Returns, for each duplicate
/// position, the index of the first occurrence it conflicts with.
pub fn intra_batch_duplicates(items: &[(Uuid, String, Action)]) -> HashMap<usize, usize> {
    let mut first_seen: HashMap<(Uuid, String), usize> = HashMap::new();
    let mut conflicts = HashMap::new();
    for (idx, (session_id, product_id, _action)) in items.iter().enumerate() {
        let key = (*session_id, product_id.clone());
        match first_seen.get(&key) {
            Some(&first) => {
                conflicts.insert(idx, first);
            }
            None => {
                first_seen.insert(key, idx);
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable_for_equal_inputs() {
        let body = json!({"b": 1, "a": 2});
        let body2 = json!({"a": 2, "b": 1});
        let query = json!({});
        let a = Guard::fingerprint("1.2.3.4", "POST", "/api/feedback", &body, &query);
        let b = Guard::fingerprint("1.2.3.4", "POST", "/api/feedback", &body2, &query);
        assert_eq!(a, b);
    }

    #[test]
    fn general_duplicate_blocks_within_window() {
        let guard = Guard::new();
        let fp = 42u64;
        assert!(matches!(guard.check_general(fp, None), GuardDecision::Allow));
        guard.record_general_pass(fp);
        assert!(matches!(
            guard.check_general(fp, None),
            GuardDecision::Duplicate { .. }
        ));
    }

    #[test]
    fn feedback_within_rapid_window_is_rejected() {
        let guard = Guard::new();
        let session = Uuid::new_v4();
        let fp = 1u64;
        guard.record_feedback_pass(fp, session, "P1", Action::Love, None);
        let decision = guard.check_feedback(fp, session, "P1", Action::Love, None);
        assert!(matches!(decision, GuardDecision::RapidFeedback { .. }));
    }

    #[test]
    fn rapid_window_fires_on_a_different_action_for_the_same_product() {
        // spec §8 S2: like, then love 1s later ⇒ rapid_feedback.
        let guard = Guard::new();
        let session = Uuid::new_v4();
        guard.record_feedback_pass(1, session, "P1", Action::Like, None);
        let decision = guard.check_feedback(2, session, "P1", Action::Love, None);
        assert!(matches!(decision, GuardDecision::RapidFeedback { .. }));
    }

    #[test]
    fn feedback_with_matching_idempotency_key_is_allowed_again() {
        let guard = Guard::new();
        let session = Uuid::new_v4();
        guard.record_feedback_pass(1, session, "P1", Action::Love, Some("idem-1".to_string()));
        let decision = guard.check_feedback(2, session, "P1", Action::Love, Some("idem-1"));
        assert!(matches!(decision, GuardDecision::Allow));
    }

    #[test]
    fn idempotent_replay_returns_cached_response() {
        let guard = Guard::new();
        guard.store_idempotent_response("key-1".to_string(), 200, json!({"ok": true}));
        let decision = guard.check_general(99, Some("key-1"));
        assert!(matches!(decision, GuardDecision::IdempotentReplay(_)));
    }

    #[test]
    fn intra_batch_duplicates_detects_repeats_of_the_same_product_across_actions() {
        // spec §8 S6: [{A,like},{A,love},{B,like}] ⇒ item 1 conflicts with
        // item 0 even though the actions differ; item 2 (product B) is clean.
        let session = Uuid::new_v4();
        let items = vec![
            (session, "A".to_string(), Action::Like),
            (session, "A".to_string(), Action::Love),
            (session, "B".to_string(), Action::Like),
        ];
        let conflicts = intra_batch_duplicates(&items);
        assert_eq!(conflicts.get(&1), Some(&0));
        assert!(!conflicts.contains_key(&2));
    }

    #[test]
    fn status_reflects_processed_flag() {
        let guard = Guard::new();
        let session = Uuid::new_v4();
        assert!(guard.status(session, "P1", Action::Love).is_none());
        guard.record_feedback_pass(1, session, "P1", Action::Love, None);
        assert_eq!(guard.status(session, "P1", Action::Love).unwrap().processed, false);
        guard.mark_processed(session, "P1", Action::Love);
        assert!(guard.status(session, "P1", Action::Love).unwrap().processed);
    }
}
