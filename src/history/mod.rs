//! C3 — Session History Store.
//!
//! Append-only log of `(session, product, shown_at, action?)` with a
//! retention cap (spec §4.3). Mutating operations on a single session are
//! serialized by the single-writer-per-session lock the orchestrator and
//! feedback processor take (spec §5); the SQL statements below are
//! additionally wrapped in a transaction so the append + overflow-trim
//! pair is atomic even without that external lock.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::{Action, SessionHistoryEntry, H_MAX};

#[derive(Clone)]
pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                shown_at TEXT NOT NULL,
                user_action TEXT,
                action_timestamp TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_history_session_shown
             ON session_history(session_id, shown_at DESC)",
            [],
        )?;
        Ok(())
    }

    /// Append a "shown" entry, then trim the oldest overflow beyond `H_max`.
    pub async fn record_shown(&self, session_id: &uuid::Uuid, product_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO session_history (session_id, product_id, shown_at, user_action, action_timestamp)
             VALUES (?1, ?2, ?3, NULL, NULL)",
            params![session_id.to_string(), product_id, now.to_rfc3339()],
        )?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM session_history WHERE session_id = ?1",
            params![session_id.to_string()],
            |r| r.get(0),
        )?;

        if count as usize > H_MAX {
            let overflow = count as usize - H_MAX;
            tx.execute(
                "DELETE FROM session_history WHERE id IN (
                    SELECT id FROM session_history
                    WHERE session_id = ?1
                    ORDER BY shown_at ASC, id ASC
                    LIMIT ?2
                )",
                params![session_id.to_string(), overflow as i64],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Update the *most recent* matching `(session, product)` entry's
    /// action. No-op with a warning if no match exists.
    pub async fn set_action(
        &self,
        session_id: &uuid::Uuid,
        product_id: &str,
        action: Action,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM session_history
                 WHERE session_id = ?1 AND product_id = ?2
                 ORDER BY shown_at DESC, id DESC LIMIT 1",
                params![session_id.to_string(), product_id],
                |r| r.get(0),
            )
            .ok();

        let Some(id) = id else {
            warn!(%session_id, product_id, "set_action: no matching history entry");
            return Ok(false);
        };

        conn.execute(
            "UPDATE session_history SET user_action = ?1, action_timestamp = ?2 WHERE id = ?3",
            params![action.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(true)
    }

    /// Best-effort compensation for the recovery policy of spec §7: clear
    /// the most recent `(session, product)` entry's action back to
    /// unset. Used when the interaction append that should have followed
    /// `set_action` fails.
    pub async fn clear_action(&self, session_id: &uuid::Uuid, product_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM session_history
                 WHERE session_id = ?1 AND product_id = ?2 AND user_action IS NOT NULL
                 ORDER BY action_timestamp DESC, id DESC LIMIT 1",
                params![session_id.to_string(), product_id],
                |r| r.get(0),
            )
            .ok();

        let Some(id) = id else { return Ok(false) };
        conn.execute(
            "UPDATE session_history SET user_action = NULL, action_timestamp = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(true)
    }

    /// Entries newest-first, capped at `limit` (default `H_max`).
    pub async fn get_history(
        &self,
        session_id: &uuid::Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<SessionHistoryEntry>> {
        let conn = self.conn.lock().await;
        let limit = limit.unwrap_or(H_MAX) as i64;
        let mut stmt = conn.prepare_cached(
            "SELECT session_id, product_id, shown_at, user_action, action_timestamp
             FROM session_history WHERE session_id = ?1
             ORDER BY shown_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id.to_string(), limit], row_to_entry)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<SessionHistoryEntry> {
    let session_id: String = row.get(0)?;
    let product_id: String = row.get(1)?;
    let shown_at: String = row.get(2)?;
    let user_action: Option<String> = row.get(3)?;
    let action_timestamp: Option<String> = row.get(4)?;

    Ok(SessionHistoryEntry {
        session_id: session_id.parse().unwrap_or_default(),
        product_id,
        shown_at: parse_ts(&shown_at),
        user_action: user_action.and_then(|a| Action::parse(&a)),
        action_timestamp: action_timestamp.map(|t| parse_ts(&t)),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> HistoryStore {
        let conn = Connection::open_in_memory().unwrap();
        let store = HistoryStore::new(Arc::new(Mutex::new(conn)));
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn record_shown_then_get_history_newest_first() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        for i in 0..3 {
            store.record_shown(&session, &format!("P{i}")).await.unwrap();
        }
        let history = store.get_history(&session, None).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].product_id, "P2");
        assert_eq!(history[2].product_id, "P0");
    }

    #[tokio::test]
    async fn retention_cap_keeps_exactly_h_max() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        for i in 0..(H_MAX + 10) {
            store.record_shown(&session, &format!("P{i}")).await.unwrap();
        }
        let history = store.get_history(&session, Some(H_MAX + 50)).await.unwrap();
        assert_eq!(history.len(), H_MAX);
        // Newest-first: the most recently inserted product survives.
        assert_eq!(history[0].product_id, format!("P{}", H_MAX + 9));
    }

    #[tokio::test]
    async fn set_action_updates_most_recent_match() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        store.record_shown(&session, "P1").await.unwrap();
        store.record_shown(&session, "P1").await.unwrap();

        let updated = store.set_action(&session, "P1", Action::Love).await.unwrap();
        assert!(updated);

        let history = store.get_history(&session, None).await.unwrap();
        assert_eq!(history[0].user_action, Some(Action::Love));
        assert_eq!(history[1].user_action, None);
    }

    #[tokio::test]
    async fn set_action_no_match_is_noop() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        let updated = store.set_action(&session, "missing", Action::Like).await.unwrap();
        assert!(!updated);
    }
}
