//! Durable notification repository.
//!
//! Rows here are append-only for content: after insert, only `is_read`
//! flips and `meta_data` gets replaced (e.g. invitation accept/reject).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use clinsync_core::{Error, NewNotification, Notification, NotificationStore, Result};

/// PostgreSQL notification repository.
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> Notification {
        Notification {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            message: r.get("message"),
            kind: r.get("type"),
            is_read: r.get("is_read"),
            token: r.get("token"),
            meta_data: r.get("meta_data"),
            created_at: r.get("created_at"),
        }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationRepository {
    async fn insert(&self, req: NewNotification) -> Result<Notification> {
        let id = clinsync_core::new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO notification (id, user_id, title, message, type, is_read, token, meta_data, created_at)
             VALUES ($1, $2, $3, $4, $5, false, $6, $7, $8)",
        )
        .bind(id)
        .bind(req.user_id)
        .bind(&req.title)
        .bind(&req.message)
        .bind(&req.kind)
        .bind(&req.token)
        .bind(&req.meta_data)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Notification {
            id,
            user_id: req.user_id,
            title: req.title,
            message: req.message,
            kind: req.kind,
            is_read: false,
            token: req.token,
            meta_data: req.meta_data,
            created_at: now,
        })
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, message, type, is_read, token, meta_data, created_at
             FROM notification
             WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification SET is_read = true WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notification SET is_read = true WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn clear_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notification WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn fetch_meta(&self, id: Uuid) -> Result<Option<JsonValue>> {
        let row = sqlx::query("SELECT meta_data FROM notification WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(r) => Ok(r.get("meta_data")),
            None => Err(Error::NotificationNotFound(id)),
        }
    }

    async fn update_meta(&self, id: Uuid, meta: JsonValue) -> Result<()> {
        let result = sqlx::query("UPDATE notification SET meta_data = $1 WHERE id = $2")
            .bind(meta)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotificationNotFound(id));
        }
        Ok(())
    }
}
