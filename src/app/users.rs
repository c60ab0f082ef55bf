use std::collections::HashMap;

use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_summary(&self, user_id: Uuid) -> Result<Option<AuthorSummary>> {
        let row = sqlx::query(
            "SELECT id, handle, display_name, avatar_url \
             FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| AuthorSummary {
            id: row.get("id"),
            handle: row.get("handle"),
            display_name: row.get("display_name"),
            avatar_url: row.get("avatar_url"),
        }))
    }

    pub async fn get_summaries(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, AuthorSummary>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT id, handle, display_name, avatar_url \
             FROM users WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(user_ids)
        .fetch_all(self.db.pool())
        .await?;

        let mut summaries = HashMap::with_capacity(rows.len());
        for row in rows {
            let summary = AuthorSummary {
                id: row.get("id"),
                handle: row.get("handle"),
                display_name: row.get("display_name"),
                avatar_url: row.get("avatar_url"),
            };
            summaries.insert(summary.id, summary);
        }

        Ok(summaries)
    }
}
