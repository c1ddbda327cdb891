//! Subprocess log lines persisted per session for the operator dashboard.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct SessionLog {
    pub id: i64,
    pub session_id: i64,
    pub level: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub logged_at: DateTime<Utc>,
}

pub struct NewLogEntry {
    pub level: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl SessionLog {
    pub async fn insert_batch(
        session_id: i64,
        entries: &[NewLogEntry],
        pool: &PgPool,
    ) -> Result<()> {
        for entry in entries {
            sqlx::query(
                "INSERT INTO session_logs (session_id, level, message, details) VALUES ($1, $2, $3, $4)",
            )
            .bind(session_id)
            .bind(&entry.level)
            .bind(&entry.message)
            .bind(&entry.details)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn tail(session_id: i64, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, SessionLog>(
            r#"
            SELECT * FROM session_logs
            WHERE session_id = $1
            ORDER BY logged_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
