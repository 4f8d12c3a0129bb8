use crate::core::market::{AuditAction, AuditEntry, AuditLog};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

/// Audit history stored in the `history` table of the market database.
#[derive(Clone)]
pub struct SqliteAuditLog {
    pool: Pool<Sqlite>,
}

impl SqliteAuditLog {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action_type TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id, id DESC)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history (user_id, action_type, description, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id as i64)
        .bind(entry.action.as_str())
        .bind(&entry.description)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, user_id: u64, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, action_type, description, created_at
            FROM history
            WHERE user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let action: String = row.try_get("action_type")?;
                let created_at: String = row.try_get("created_at")?;
                Ok(AuditEntry {
                    user_id: row.try_get::<i64, _>("user_id")? as u64,
                    action: AuditAction::parse(&action)
                        .ok_or_else(|| anyhow!("unknown audit action {:?}", action))?,
                    description: row.try_get("description")?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
                })
            })
            .collect()
    }
}
