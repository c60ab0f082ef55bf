use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::post::{collect_hashtags, NewPost, Post, PostVisibility};
use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;

pub const MAX_CONTENT_CHARS: usize = 5000;
pub const MAX_MEDIA_URLS: usize = 10;
pub const EMPTY_CONTENT: &str = "content cannot be empty";
pub const CONTENT_TOO_LONG: &str = "content must be at most 5000 characters";
pub const TOO_MANY_MEDIA_URLS: &str = "at most 10 media urls are allowed";

pub fn validate_post(new_post: &NewPost) -> Result<()> {
    if new_post.content.trim().is_empty() {
        return Err(anyhow::anyhow!(EMPTY_CONTENT));
    }
    if new_post.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(anyhow::anyhow!(CONTENT_TOO_LONG));
    }
    if new_post.media_urls.len() > MAX_MEDIA_URLS {
        return Err(anyhow::anyhow!(TOO_MANY_MEDIA_URLS));
    }
    Ok(())
}

/// Select list shared by every query that returns posts. Expects `posts p`
/// joined with `users u` on the author.
pub(crate) const POST_COLUMNS: &str = "p.id, p.author_id, u.handle AS author_handle, \
     u.display_name AS author_display_name, u.avatar_url AS author_avatar_url, \
     p.content, p.visibility::text AS visibility, p.created_at, p.media_urls, p.hashtags, \
     p.community_id, p.likes_count, p.comments_count";

/// Direct-access visibility with the viewer bound as `$2`: own posts, public
/// and unlisted posts, and friends-only posts of followed authors.
const VISIBLE_TO_VIEWER: &str = "(p.author_id = $2 \
     OR p.visibility = 'public' \
     OR p.visibility = 'unlisted' \
     OR (p.visibility = 'friends' AND EXISTS ( \
         SELECT 1 FROM follows f WHERE f.follower_id = $2 AND f.followee_id = p.author_id \
     )))";

pub(crate) fn post_from_row(row: &PgRow) -> Result<Post> {
    let visibility: String = row.try_get("visibility")?;
    let visibility = PostVisibility::from_db(&visibility)
        .ok_or_else(|| anyhow::anyhow!("unknown post visibility: {}", visibility))?;
    let author_id: Uuid = row.try_get("author_id")?;

    Ok(Post {
        id: row.try_get("id")?,
        author_id,
        author: Some(AuthorSummary {
            id: author_id,
            handle: row.try_get("author_handle")?,
            display_name: row.try_get("author_display_name")?,
            avatar_url: row.try_get("author_avatar_url")?,
        }),
        content: row.try_get("content")?,
        visibility,
        created_at: row.try_get("created_at")?,
        media_urls: row.try_get("media_urls")?,
        hashtags: row.try_get("hashtags")?,
        community_id: row.try_get("community_id")?,
        likes_count: row.try_get("likes_count")?,
        comments_count: row.try_get("comments_count")?,
    })
}

#[derive(Clone)]
pub struct PostService {
    db: Db,
}

impl PostService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_post(&self, author_id: Uuid, new_post: NewPost) -> Result<Post> {
        validate_post(&new_post)?;

        if let Some(community_id) = new_post.community_id {
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
        }

        let hashtags = collect_hashtags(&new_post.content, &new_post.hashtags);

        let query = format!(
            "WITH inserted AS ( \
                INSERT INTO posts (author_id, content, visibility, media_urls, hashtags, community_id) \
                VALUES ($1, $2, $3::post_visibility, $4, $5, $6) \
                RETURNING * \
             ) \
             SELECT {} FROM inserted p \
             JOIN users u ON u.id = p.author_id AND u.deleted_at IS NULL",
            POST_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(author_id)
            .bind(&new_post.content)
            .bind(new_post.visibility.as_db())
            .bind(&new_post.media_urls)
            .bind(&hashtags)
            .bind(new_post.community_id)
            .fetch_one(self.db.pool())
            .await?;

        post_from_row(&row)
    }

    /// Fetches a post by id. Unlisted posts are reachable here even though
    /// feeds never list them; hidden posts are not.
    pub async fn get_post(&self, post_id: Uuid, viewer_id: Uuid) -> Result<Option<Post>> {
        let query = format!(
            "SELECT {} FROM posts p \
             JOIN users u ON u.id = p.author_id AND u.deleted_at IS NULL \
             WHERE p.id = $1 AND p.hidden_at IS NULL AND {}",
            POST_COLUMNS, VISIBLE_TO_VIEWER
        );
        let row = sqlx::query(&query)
            .bind(post_id)
            .bind(viewer_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Fetches a public, visible post for live delivery, where no viewer is
    /// known.
    pub async fn get_public_post(&self, post_id: Uuid) -> Result<Option<Post>> {
        let query = format!(
            "SELECT {} FROM posts p \
             JOIN users u ON u.id = p.author_id AND u.deleted_at IS NULL \
             WHERE p.id = $1 AND p.hidden_at IS NULL AND p.visibility = 'public'",
            POST_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(post_from_row).transpose()
    }

    pub async fn delete_post(&self, post_id: Uuid, author_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND author_id = $2")
            .bind(post_id)
            .bind(author_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
