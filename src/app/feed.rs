use anyhow::Result;
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use crate::app::communities::CommunityService;
use crate::app::posts::{post_from_row, POST_COLUMNS};
use crate::config::FeedSettings;
use crate::domain::post::{normalize_hashtag, FeedCursor, Post};
use crate::infra::{cache::RedisCache, db::Db};

/// Optional narrowing of a feed beyond the always-on visibility and
/// membership rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub hashtag: Option<String>,
    pub community_id: Option<Uuid>,
}

impl FeedQuery {
    pub fn new(hashtag: Option<&str>, community_id: Option<Uuid>) -> Self {
        Self {
            hashtag: hashtag.and_then(normalize_hashtag),
            community_id,
        }
    }
}

/// How community posts are admitted into a viewer's feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipClause {
    /// The viewer belongs to no community: only posts without one.
    UnaffiliatedOnly,
    /// Posts without a community, or from one of these.
    UnaffiliatedOrAnyOf(Vec<Uuid>),
}

impl MembershipClause {
    pub fn from_memberships(community_ids: Vec<Uuid>) -> Self {
        if community_ids.is_empty() {
            Self::UnaffiliatedOnly
        } else {
            Self::UnaffiliatedOrAnyOf(community_ids)
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub next_cursor: Option<FeedCursor>,
    pub has_more: bool,
}

impl FeedPage {
    /// A full page means more may exist; this is a hint, not a guarantee.
    pub fn from_posts(posts: Vec<Post>, limit: i64) -> Self {
        let has_more = limit > 0 && posts.len() as i64 == limit;
        let next_cursor = posts.last().map(Post::cursor);
        Self {
            posts,
            next_cursor,
            has_more,
        }
    }
}

/// Builds the keyset page query: newest first, strictly older than
/// `cursor` when given.
pub fn build_page_query(
    viewer_id: Uuid,
    query: &FeedQuery,
    membership: &MembershipClause,
    cursor: Option<FeedCursor>,
    limit: i64,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT ");
    builder.push(POST_COLUMNS);
    builder.push(
        " FROM posts p \
         JOIN users u ON u.id = p.author_id AND u.deleted_at IS NULL \
         WHERE p.hidden_at IS NULL",
    );

    builder.push(" AND (p.author_id = ");
    builder.push_bind(viewer_id);
    builder.push(" OR p.visibility = 'public' OR (p.visibility = 'friends' AND EXISTS (");
    builder.push("SELECT 1 FROM follows f WHERE f.follower_id = ");
    builder.push_bind(viewer_id);
    builder.push(" AND f.followee_id = p.author_id)))");

    match membership {
        MembershipClause::UnaffiliatedOnly => {
            builder.push(" AND p.community_id IS NULL");
        }
        MembershipClause::UnaffiliatedOrAnyOf(community_ids) => {
            builder.push(" AND (p.community_id IS NULL OR p.community_id = ANY(");
            builder.push_bind(community_ids.clone());
            builder.push("))");
        }
    }

    if let Some(community_id) = query.community_id {
        builder.push(" AND p.community_id = ");
        builder.push_bind(community_id);
    }

    if let Some(hashtag) = &query.hashtag {
        builder.push(" AND ");
        builder.push_bind(hashtag.clone());
        builder.push(" = ANY(p.hashtags)");
    }

    if let Some(cursor) = cursor {
        builder.push(" AND (p.created_at < ");
        builder.push_bind(cursor.created_at);
        builder.push(" OR (p.created_at = ");
        builder.push_bind(cursor.created_at);
        builder.push(" AND p.id < ");
        builder.push_bind(cursor.id);
        builder.push("))");
    }

    builder.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
    builder.push_bind(limit);
    builder
}

#[derive(Clone)]
pub struct FeedService {
    db: Db,
    communities: CommunityService,
}

impl FeedService {
    pub fn new(db: Db, cache: RedisCache, settings: FeedSettings) -> Self {
        let communities =
            CommunityService::new(db.clone(), cache, settings.membership_cache_ttl_seconds);
        Self { db, communities }
    }

    pub async fn fetch_page(
        &self,
        viewer_id: Uuid,
        query: &FeedQuery,
        cursor: Option<FeedCursor>,
        limit: i64,
    ) -> Result<FeedPage> {
        let memberships = self.communities.membership_ids(viewer_id).await?;
        let membership = MembershipClause::from_memberships(memberships);

        let mut builder = build_page_query(viewer_id, query, &membership, cursor, limit);
        let rows = builder.build().fetch_all(self.db.pool()).await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in &rows {
            posts.push(post_from_row(row)?);
        }

        debug!(
            viewer_id = %viewer_id,
            returned = posts.len(),
            paginated = cursor.is_some(),
            "fetched feed page"
        );

        Ok(FeedPage::from_posts(posts, limit))
    }
}
