use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::user::AuthorSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorSummary>,
    pub content: String,
    pub visibility: PostVisibility,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub community_id: Option<Uuid>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
}

impl Post {
    pub fn cursor(&self) -> FeedCursor {
        FeedCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// Creation time in epoch milliseconds.
    pub fn created_at_ms(&self) -> i64 {
        (self.created_at.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostVisibility {
    Public,
    Friends,
    Private,
    Unlisted,
}

impl PostVisibility {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "friends" => Some(Self::Friends),
            "private" => Some(Self::Private),
            "unlisted" => Some(Self::Unlisted),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Friends => "friends",
            Self::Private => "private",
            Self::Unlisted => "unlisted",
        }
    }
}

/// Tail of a loaded window. Field order gives the `(created_at, id)` ordering
/// used by keyset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedCursor {
    pub created_at: OffsetDateTime,
    pub id: Uuid,
}

impl FeedCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// Parses the `<rfc3339>/<uuid>` wire form.
    pub fn parse(value: &str) -> Option<Self> {
        let (timestamp, id) = value.split_once('/')?;
        let created_at = OffsetDateTime::parse(timestamp, &Rfc3339).ok()?;
        let id = Uuid::parse_str(id).ok()?;
        Some(Self { created_at, id })
    }

    pub fn encode(&self) -> Option<String> {
        let timestamp = self.created_at.format(&Rfc3339).ok()?;
        Some(format!("{}/{}", timestamp, self.id))
    }

    /// True when `post` sorts strictly after this cursor in keyset order,
    /// i.e. it is older.
    pub fn precedes(&self, post: &Post) -> bool {
        post.cursor() < *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCounts {
    pub post_id: Uuid,
    pub likes_count: i64,
    pub comments_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub content: String,
    pub visibility: PostVisibility,
    pub media_urls: Vec<String>,
    pub hashtags: Vec<String>,
    pub community_id: Option<Uuid>,
}

/// Lowercases a tag and strips leading `#`. Returns `None` for blank tags.
pub fn normalize_hashtag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim();
    if tag.is_empty() {
        return None;
    }
    Some(tag.to_lowercase())
}

/// Collects `#tag` tokens from post content followed by `extra`, normalized
/// and deduplicated in first-seen order.
pub fn collect_hashtags(content: &str, extra: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    let inline = content.split_whitespace().filter_map(|word| {
        let rest = word.strip_prefix('#')?;
        let tag: String = rest
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        normalize_hashtag(&tag)
    });
    let explicit = extra.iter().filter_map(|tag| normalize_hashtag(tag));

    for tag in inline.chain(explicit) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    tags
}
