//! Session entity store (`user_sessions` collection, spec §3, §6).
//!
//! Created by the session endpoint; mutated only by feedback (increments
//! `total_interactions`, touches `updated_at`); never destroyed by the
//! core (external TTL may retire a session, hence `mark_inactive`, used by
//! operational tooling rather than the public HTTP surface).

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Session, SessionStatus};

#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                alpha REAL NOT NULL,
                dimensions INTEGER NOT NULL,
                total_interactions INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub async fn create(&self, user_id: &str, alpha: f64, dimensions: usize) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            alpha,
            dimensions,
            total_interactions: 0,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO user_sessions
                (session_id, user_id, alpha, dimensions, total_interactions, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.session_id.to_string(),
                session.user_id,
                session.alpha,
                session.dimensions as i64,
                session.total_interactions as i64,
                status_str(session.status),
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(session)
    }

    pub async fn get(&self, session_id: &Uuid) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT session_id, user_id, alpha, dimensions, total_interactions, status, created_at, updated_at
             FROM user_sessions WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query(params![session_id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_session(row)?))
        } else {
            Ok(None)
        }
    }

    /// Increment `total_interactions`, persist the (possibly decayed)
    /// `alpha`, and touch `updated_at`. Called once per successful feedback
    /// call (spec §4.6 step 7).
    pub async fn record_interaction(&self, session_id: &Uuid, new_alpha: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE user_sessions
             SET total_interactions = total_interactions + 1,
                 alpha = ?2,
                 updated_at = ?3
             WHERE session_id = ?1",
            params![session_id.to_string(), new_alpha, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn mark_inactive(&self, session_id: &Uuid) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE user_sessions SET status = 'inactive', updated_at = ?2 WHERE session_id = ?1",
            params![session_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Active => "active",
        SessionStatus::Inactive => "inactive",
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let session_id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(Session {
        session_id: session_id.parse().unwrap_or_default(),
        user_id: row.get(1)?,
        alpha: row.get(2)?,
        dimensions: row.get::<_, i64>(3)? as usize,
        total_interactions: row.get::<_, i64>(4)? as u32,
        status: if status == "active" {
            SessionStatus::Active
        } else {
            SessionStatus::Inactive
        },
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
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

    async fn store() -> SessionStore {
        let conn = Connection::open_in_memory().unwrap();
        let store = SessionStore::new(Arc::new(Mutex::new(conn)));
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store().await;
        let created = store.create("u1", 0.3, 26).await.unwrap();
        let fetched = store.get(&created.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(fetched.total_interactions, 0);
        assert_eq!(fetched.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn record_interaction_increments_and_persists_alpha() {
        let store = store().await;
        let created = store.create("u1", 0.3, 26).await.unwrap();
        store.record_interaction(&created.session_id, 0.285).await.unwrap();
        let fetched = store.get(&created.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.total_interactions, 1);
        assert!((fetched.alpha - 0.285).abs() < 1e-9);
    }

    #[tokio::test]
    async fn mark_inactive_flips_status() {
        let store = store().await;
        let created = store.create("u1", 0.3, 26).await.unwrap();
        store.mark_inactive(&created.session_id).await.unwrap();
        let fetched = store.get(&created.session_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Inactive);
    }
}
