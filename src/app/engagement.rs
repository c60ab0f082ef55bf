use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::engagement::{Comment, CommentThread, Like, LikeColor};
use crate::domain::post::{FeedCursor, PostCounts};
use crate::infra::db::Db;

pub const MAX_COMMENT_CHARS: usize = 2000;
pub const EMPTY_COMMENT: &str = "comment cannot be empty";
pub const COMMENT_TOO_LONG: &str = "comment must be at most 2000 characters";

/// Comments are 1..=2000 characters once surrounding whitespace is ignored.
pub fn validate_comment(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(anyhow::anyhow!(EMPTY_COMMENT));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(anyhow::anyhow!(COMMENT_TOO_LONG));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct LikeOutcome {
    /// False when an existing like was only recolored.
    pub created: bool,
    pub color: LikeColor,
}

#[derive(Clone)]
pub struct EngagementService {
    db: Db,
}

impl EngagementService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn like_post(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        color: LikeColor,
    ) -> Result<Option<LikeOutcome>> {
        let mut tx = self.db.pool().begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1 AND hidden_at IS NULL)",
        )
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            tx.rollback().await?;
            return Ok(None);
        }

        // xmax is zero only for freshly inserted rows.
        let created: bool = sqlx::query_scalar(
            "INSERT INTO likes (post_id, user_id, color) VALUES ($1, $2, $3) \
             ON CONFLICT (post_id, user_id) DO UPDATE SET color = EXCLUDED.color \
             RETURNING (xmax = 0)",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(color.as_db())
        .fetch_one(&mut *tx)
        .await?;

        if created {
            sqlx::query("UPDATE posts SET likes_count = likes_count + 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Some(LikeOutcome { created, color }))
    }

    pub async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        let removed = result.rows_affected() > 0;

        if removed {
            sqlx::query(
                "UPDATE posts SET likes_count = GREATEST(likes_count - 1, 0) WHERE id = $1",
            )
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(removed)
    }

    pub async fn list_likes(
        &self,
        post_id: Uuid,
        cursor: Option<FeedCursor>,
        limit: i64,
    ) -> Result<Vec<Like>> {
        let rows = match cursor {
            Some(FeedCursor {
                created_at,
                id: user_id,
            }) => {
                sqlx::query(
                    "SELECT post_id, user_id, color, created_at \
                     FROM likes \
                     WHERE post_id = $1 \
                       AND (created_at < $2 OR (created_at = $2 AND user_id < $3)) \
                     ORDER BY created_at DESC, user_id DESC \
                     LIMIT $4",
                )
                .bind(post_id)
                .bind(created_at)
                .bind(user_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT post_id, user_id, color, created_at \
                     FROM likes \
                     WHERE post_id = $1 \
                     ORDER BY created_at DESC, user_id DESC \
                     LIMIT $2",
                )
                .bind(post_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let mut likes = Vec::with_capacity(rows.len());
        for row in rows {
            let color: String = row.get("color");
            let color = LikeColor::from_db(&color)
                .ok_or_else(|| anyhow::anyhow!("unknown like color: {}", color))?;
            likes.push(Like {
                post_id: row.get("post_id"),
                user_id: row.get("user_id"),
                color,
                created_at: row.get("created_at"),
            });
        }

        Ok(likes)
    }

    pub async fn comment_post(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> Result<Comment> {
        validate_comment(&content)?;

        let mut tx = self.db.pool().begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1 AND hidden_at IS NULL)",
        )
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            tx.rollback().await?;
            return Err(anyhow::anyhow!("post not found"));
        }

        if let Some(parent_id) = parent_id {
            let parent = sqlx::query("SELECT post_id, parent_id FROM comments WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(parent) = parent else {
                tx.rollback().await?;
                return Err(anyhow::anyhow!("parent comment not found"));
            };
            let parent_post: Uuid = parent.get("post_id");
            let grandparent: Option<Uuid> = parent.get("parent_id");
            if parent_post != post_id {
                tx.rollback().await?;
                return Err(anyhow::anyhow!("parent comment not found"));
            }
            if grandparent.is_some() {
                tx.rollback().await?;
                return Err(anyhow::anyhow!("replies cannot be nested"));
            }
        }

        let row = sqlx::query(
            "INSERT INTO comments (post_id, user_id, content, parent_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, post_id, user_id, content, parent_id, created_at",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(content)
        .bind(parent_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE posts SET comments_count = comments_count + 1 WHERE id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Comment {
            id: row.get("id"),
            post_id: row.get("post_id"),
            user_id: row.get("user_id"),
            content: row.get("content"),
            parent_id: row.get("parent_id"),
            created_at: row.get("created_at"),
        })
    }

    pub async fn list_threads(&self, post_id: Uuid) -> Result<Vec<CommentThread>> {
        let rows = sqlx::query(
            "SELECT id, post_id, user_id, content, parent_id, created_at \
             FROM comments \
             WHERE post_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut comments = Vec::with_capacity(rows.len());
        for row in rows {
            comments.push(Comment {
                id: row.get("id"),
                post_id: row.get("post_id"),
                user_id: row.get("user_id"),
                content: row.get("content"),
                parent_id: row.get("parent_id"),
                created_at: row.get("created_at"),
            });
        }

        Ok(CommentThread::assemble(comments))
    }

    /// Deletes the caller's comment and, for a top-level comment, its
    /// replies. Returns the number of comments removed.
    pub async fn delete_comment(
        &self,
        comment_id: Uuid,
        post_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;

        let replies = sqlx::query(
            "DELETE FROM comments WHERE parent_id = $1 AND post_id = $2 \
               AND EXISTS (SELECT 1 FROM comments WHERE id = $1 AND user_id = $3)",
        )
        .bind(comment_id)
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let comment = sqlx::query(
            "DELETE FROM comments WHERE id = $1 AND post_id = $2 AND user_id = $3",
        )
        .bind(comment_id)
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if comment.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        let removed = comment.rows_affected() + replies.rows_affected();
        sqlx::query(
            "UPDATE posts SET comments_count = GREATEST(comments_count - $2, 0) WHERE id = $1",
        )
        .bind(post_id)
        .bind(removed as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(removed)
    }

    /// Counts computed from the likes and comments themselves rather than
    /// the denormalized columns.
    pub async fn authoritative_counts(&self, post_ids: &[Uuid]) -> Result<Vec<PostCounts>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT p.id, \
                    (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS likes_count, \
                    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count \
             FROM posts p \
             WHERE p.id = ANY($1)",
        )
        .bind(post_ids)
        .fetch_all(self.db.pool())
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            counts.push(PostCounts {
                post_id: row.get("id"),
                likes_count: row.get("likes_count"),
                comments_count: row.get("comments_count"),
            });
        }

        Ok(counts)
    }
}
