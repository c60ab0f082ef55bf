use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::app::social::SocialService;
use crate::app::users::UserService;
use crate::domain::post::normalize_hashtag;
use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;

/// The parts of a liked post that suggestions are drawn from.
#[derive(Debug, Clone)]
pub struct LikedPost {
    pub author_id: Uuid,
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSuggestion {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorSuggestion {
    pub author: AuthorSummary,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Suggestions {
    pub tags: Vec<TagSuggestion>,
    pub authors: Vec<AuthorSuggestion>,
}

/// Counts occurrences while remembering first-seen order, which breaks
/// ties when ranking.
struct FrequencyTable<K> {
    order: Vec<(K, usize)>,
    index: HashMap<K, usize>,
}

impl<K: Eq + Hash + Clone> FrequencyTable<K> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn record(&mut self, key: K) {
        match self.index.get(&key) {
            Some(&slot) => self.order[slot].1 += 1,
            None => {
                self.index.insert(key.clone(), self.order.len());
                self.order.push((key, 1));
            }
        }
    }

    fn top(mut self, limit: usize, keep: impl Fn(&K) -> bool) -> Vec<(K, usize)> {
        self.order.retain(|(key, _)| keep(key));
        self.order.sort_by(|a, b| b.1.cmp(&a.1));
        self.order.truncate(limit);
        self.order
    }
}

/// Top tags by frequency across `liked`, blank tags excluded.
pub fn rank_tags(liked: &[LikedPost], limit: usize) -> Vec<TagSuggestion> {
    let mut table = FrequencyTable::new();
    for post in liked {
        for tag in post.hashtags.iter().filter_map(|tag| normalize_hashtag(tag)) {
            table.record(tag);
        }
    }

    table
        .top(limit, |_| true)
        .into_iter()
        .map(|(tag, count)| TagSuggestion { tag, count })
        .collect()
}

/// Top authors by frequency across `liked`, skipping `viewer_id` and anyone
/// in `following`.
pub fn rank_authors(
    liked: &[LikedPost],
    viewer_id: Uuid,
    following: &HashSet<Uuid>,
    limit: usize,
) -> Vec<(Uuid, usize)> {
    let mut table = FrequencyTable::new();
    for post in liked {
        table.record(post.author_id);
    }

    table.top(limit, |author_id| {
        *author_id != viewer_id && !following.contains(author_id)
    })
}

#[derive(Clone)]
pub struct SuggestionService {
    db: Db,
}

impl SuggestionService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Posts behind the viewer's most recent `like_window` likes.
    pub async fn recent_liked_posts(&self, user_id: Uuid, like_window: i64) -> Result<Vec<LikedPost>> {
        let rows = sqlx::query(
            "SELECT p.author_id, p.hashtags \
             FROM likes l \
             JOIN posts p ON p.id = l.post_id AND p.hidden_at IS NULL \
             WHERE l.user_id = $1 \
             ORDER BY l.created_at DESC, l.post_id DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(like_window)
        .fetch_all(self.db.pool())
        .await?;

        let mut liked = Vec::with_capacity(rows.len());
        for row in rows {
            liked.push(LikedPost {
                author_id: row.try_get("author_id")?,
                hashtags: row.try_get("hashtags")?,
            });
        }

        Ok(liked)
    }

    pub async fn suggest(&self, user_id: Uuid, like_window: i64, limit: usize) -> Result<Suggestions> {
        let liked = self.recent_liked_posts(user_id, like_window).await?;
        if liked.is_empty() {
            return Ok(Suggestions::default());
        }

        let following = SocialService::new(self.db.clone())
            .following_ids(user_id)
            .await?;

        let tags = rank_tags(&liked, limit);
        let ranked_authors = rank_authors(&liked, user_id, &following, limit);

        let author_ids: Vec<Uuid> = ranked_authors.iter().map(|(id, _)| *id).collect();
        let mut summaries = UserService::new(self.db.clone())
            .get_summaries(&author_ids)
            .await?;
        let authors = ranked_authors
            .into_iter()
            .filter_map(|(id, count)| {
                summaries
                    .remove(&id)
                    .map(|author| AuthorSuggestion { author, count })
            })
            .collect();

        debug!(
            user_id = %user_id,
            liked = liked.len(),
            "computed suggestions"
        );

        Ok(Suggestions { tags, authors })
    }
}
