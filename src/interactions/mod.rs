//! Append-only interaction log: the authoritative replay stream for C2
//! (spec §3 "Model state", §5 "append-only; never edited or deleted").

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Action, Interaction};

#[derive(Clone)]
pub struct InteractionStore {
    conn: Arc<Mutex<Connection>>,
}

impl InteractionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                action TEXT NOT NULL,
                reward REAL NOT NULL,
                feature_vector TEXT NOT NULL,
                score_before REAL NOT NULL,
                score_after REAL NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_interactions_session_ts
             ON interactions(session_id, timestamp ASC, id ASC)",
            [],
        )?;
        Ok(())
    }

    /// Append one reward event. Never updates or deletes an existing row.
    pub async fn append(&self, interaction: &Interaction) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO interactions
                (session_id, product_id, action, reward, feature_vector, score_before, score_after, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                interaction.session_id.to_string(),
                interaction.product_id,
                interaction.action.as_str(),
                interaction.reward,
                encode_vector(&interaction.feature_vector),
                interaction.score_before,
                interaction.score_after,
                interaction.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The full ordered interaction log for a session, oldest first — the
    /// replay input for `LinUcbState::replay`.
    pub async fn replay_log(&self, session_id: &Uuid) -> Result<Vec<Interaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT session_id, product_id, action, reward, feature_vector, score_before, score_after, timestamp
             FROM interactions WHERE session_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], row_to_interaction)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub async fn count(&self, session_id: &Uuid) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM interactions WHERE session_id = ?1",
            params![session_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

fn encode_vector(v: &[u8]) -> String {
    v.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(",")
}

fn decode_vector(s: &str) -> Vec<u8> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',').filter_map(|p| p.parse().ok()).collect()
}

fn row_to_interaction(row: &rusqlite::Row) -> rusqlite::Result<Interaction> {
    let session_id: String = row.get(0)?;
    let action: String = row.get(2)?;
    let feature_vector: String = row.get(4)?;
    let timestamp: String = row.get(7)?;

    Ok(Interaction {
        session_id: session_id.parse().unwrap_or_default(),
        product_id: row.get(1)?,
        action: Action::parse(&action).unwrap_or(Action::Neutral),
        reward: row.get(3)?,
        feature_vector: decode_vector(&feature_vector),
        score_before: row.get(5)?,
        score_after: row.get(6)?,
        timestamp: parse_ts(&timestamp),
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

    fn sample(session: Uuid, product: &str, reward: f64) -> Interaction {
        Interaction {
            session_id: session,
            product_id: product.to_string(),
            action: Action::Love,
            reward,
            feature_vector: vec![1, 0, 1, 0],
            score_before: 0.1,
            score_after: 0.2,
            timestamp: Utc::now(),
        }
    }

    async fn store() -> InteractionStore {
        let conn = Connection::open_in_memory().unwrap();
        let store = InteractionStore::new(Arc::new(Mutex::new(conn)));
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn append_then_replay_preserves_order() {
        let store = store().await;
        let session = Uuid::new_v4();
        store.append(&sample(session, "P1", 2.0)).await.unwrap();
        store.append(&sample(session, "P2", -1.0)).await.unwrap();

        let log = store.replay_log(&session).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].product_id, "P1");
        assert_eq!(log[1].product_id, "P2");
        assert_eq!(log[1].reward, -1.0);
    }

    #[tokio::test]
    async fn feature_vector_round_trips() {
        let store = store().await;
        let session = Uuid::new_v4();
        store.append(&sample(session, "P1", 1.0)).await.unwrap();
        let log = store.replay_log(&session).await.unwrap();
        assert_eq!(log[0].feature_vector, vec![1, 0, 1, 0]);
    }

    #[tokio::test]
    async fn count_reflects_appended_rows() {
        let store = store().await;
        let session = Uuid::new_v4();
        assert_eq!(store.count(&session).await.unwrap(), 0);
        store.append(&sample(session, "P1", 1.0)).await.unwrap();
        assert_eq!(store.count(&session).await.unwrap(), 1);
    }
}
