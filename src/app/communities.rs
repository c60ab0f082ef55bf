use anyhow::Result;
use uuid::Uuid;

use crate::infra::{cache::RedisCache, db::Db};

#[derive(Clone)]
pub struct CommunityService {
    db: Db,
    cache: RedisCache,
    membership_ttl_seconds: u64,
}

pub(crate) fn membership_cache_key(user_id: Uuid) -> String {
    format!("membership:{}", user_id)
}

impl CommunityService {
    pub fn new(db: Db, cache: RedisCache, membership_ttl_seconds: u64) -> Self {
        Self {
            db,
            cache,
            membership_ttl_seconds,
        }
    }

    pub async fn join(&self, user_id: Uuid, community_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM communities WHERE id = $1)",
        )
        .bind(community_id)
        .fetch_one(self.db.pool())
        .await?;
        if !exists {
            return Err(anyhow::anyhow!("community not found"));
        }

        let result = sqlx::query(
            "INSERT INTO community_members (community_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(community_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        self.refresh_memberships(user_id).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn leave(&self, user_id: Uuid, community_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM community_members WHERE community_id = $1 AND user_id = $2",
        )
        .bind(community_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        self.refresh_memberships(user_id).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT community_id FROM community_members WHERE user_id = $1 \
             ORDER BY community_id",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(ids)
    }

    /// Overwrites the cached set after a membership change. Deleting it
    /// instead would let a fill that read the old rows land afterwards.
    async fn refresh_memberships(&self, user_id: Uuid) -> Result<()> {
        let ids = self.load_memberships(user_id).await?;
        self.cache
            .set_json(&membership_cache_key(user_id), &ids, self.membership_ttl_seconds)
            .await;
        Ok(())
    }

    /// Communities the user belongs to. Served from cache when present.
    pub async fn membership_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let key = membership_cache_key(user_id);
        if let Some(ids) = self.cache.get_json::<Vec<Uuid>>(&key).await {
            return Ok(ids);
        }

        let ids = self.load_memberships(user_id).await?;
        self.cache
            .fill_json(&key, &ids, self.membership_ttl_seconds)
            .await;
        Ok(ids)
    }

    pub async fn is_member(&self, user_id: Uuid, community_id: Uuid) -> Result<bool> {
        let ids = self.membership_ids(user_id).await?;
        Ok(ids.contains(&community_id))
    }

    /// Resolves the community a chat channel belongs to.
    pub async fn channel_community(&self, channel_id: Uuid) -> Result<Option<Uuid>> {
        let community_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT community_id FROM chat_channels WHERE id = $1",
        )
        .bind(channel_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(community_id)
    }
}
