use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::chat::ChatMessage;
use crate::domain::post::FeedCursor;
use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const EMPTY_MESSAGE: &str = "message cannot be empty";
pub const MESSAGE_TOO_LONG: &str = "message must be at most 2000 characters";

pub fn validate_message(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(anyhow::anyhow!(EMPTY_MESSAGE));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(anyhow::anyhow!(MESSAGE_TOO_LONG));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ChatService {
    db: Db,
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> ChatMessage {
    let author_id: Uuid = row.get("author_id");
    ChatMessage {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        author_id,
        author: Some(AuthorSummary {
            id: author_id,
            handle: row.get("author_handle"),
            display_name: row.get("author_display_name"),
            avatar_url: row.get("author_avatar_url"),
        }),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

impl ChatService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Newest messages first.
    pub async fn list_messages(
        &self,
        channel_id: Uuid,
        cursor: Option<FeedCursor>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let rows = match cursor {
            Some(FeedCursor {
                created_at,
                id: message_id,
            }) => {
                sqlx::query(
                    "SELECT m.id, m.channel_id, m.author_id, m.content, m.created_at, \
                            u.handle AS author_handle, u.display_name AS author_display_name, \
                            u.avatar_url AS author_avatar_url \
                     FROM chat_messages m \
                     JOIN users u ON u.id = m.author_id \
                     WHERE m.channel_id = $1 \
                       AND (m.created_at < $2 OR (m.created_at = $2 AND m.id < $3)) \
                     ORDER BY m.created_at DESC, m.id DESC \
                     LIMIT $4",
                )
                .bind(channel_id)
                .bind(created_at)
                .bind(message_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT m.id, m.channel_id, m.author_id, m.content, m.created_at, \
                            u.handle AS author_handle, u.display_name AS author_display_name, \
                            u.avatar_url AS author_avatar_url \
                     FROM chat_messages m \
                     JOIN users u ON u.id = m.author_id \
                     WHERE m.channel_id = $1 \
                     ORDER BY m.created_at DESC, m.id DESC \
                     LIMIT $2",
                )
                .bind(channel_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows.iter().map(message_from_row).collect())
    }

    pub async fn get_message(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        let row = sqlx::query(
            "SELECT m.id, m.channel_id, m.author_id, m.content, m.created_at, \
                    u.handle AS author_handle, u.display_name AS author_display_name, \
                    u.avatar_url AS author_avatar_url \
             FROM chat_messages m \
             JOIN users u ON u.id = m.author_id \
             WHERE m.id = $1",
        )
        .bind(message_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(message_from_row))
    }

    /// Posts a message; the author must belong to the channel's community.
    pub async fn send_message(
        &self,
        channel_id: Uuid,
        author_id: Uuid,
        content: String,
    ) -> Result<ChatMessage> {
        validate_message(&content)?;

        let community_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT community_id FROM chat_channels WHERE id = $1",
        )
        .bind(channel_id)
        .fetch_optional(self.db.pool())
        .await?;
        let Some(community_id) = community_id else {
            return Err(anyhow::anyhow!("channel not found"));
        };

        let is_member: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
                SELECT 1 FROM community_members WHERE community_id = $1 AND user_id = $2 \
             )",
        )
        .bind(community_id)
        .bind(author_id)
        .fetch_one(self.db.pool())
        .await?;
        if !is_member {
            return Err(anyhow::anyhow!("not a member of this community"));
        }

        let row = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO chat_messages (channel_id, author_id, content) \
                VALUES ($1, $2, $3) \
                RETURNING id, channel_id, author_id, content, created_at \
             ) \
             SELECT m.*, u.handle AS author_handle, u.display_name AS author_display_name, \
                    u.avatar_url AS author_avatar_url \
             FROM inserted m \
             JOIN users u ON u.id = m.author_id",
        )
        .bind(channel_id)
        .bind(author_id)
        .bind(content)
        .fetch_one(self.db.pool())
        .await?;

        Ok(message_from_row(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_one_to_two_thousand_characters() {
        assert_eq!(validate_message("   ").unwrap_err().to_string(), EMPTY_MESSAGE);
        assert!(validate_message(&"😀".repeat(MAX_MESSAGE_CHARS)).is_ok());
        let err = validate_message(&"😀".repeat(MAX_MESSAGE_CHARS + 1)).unwrap_err();
        assert_eq!(err.to_string(), MESSAGE_TOO_LONG);
        assert!(MESSAGE_TOO_LONG.contains(&MAX_MESSAGE_CHARS.to_string()));
    }
}
