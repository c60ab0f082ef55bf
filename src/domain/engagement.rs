use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub color: LikeColor,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeColor {
    #[default]
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
}

impl LikeColor {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "red" => Some(Self::Red),
            "orange" => Some(Self::Orange),
            "yellow" => Some(Self::Yellow),
            "green" => Some(Self::Green),
            "blue" => Some(Self::Blue),
            "purple" => Some(Self::Purple),
            "pink" => Some(Self::Pink),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Purple => "purple",
            Self::Pink => "pink",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub parent_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A top-level comment with its direct replies. Replies are never nested
/// further.
#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

impl CommentThread {
    /// Groups comments into threads in creation order. Replies whose parent
    /// is missing (or is itself a reply) are dropped.
    pub fn assemble(mut comments: Vec<Comment>) -> Vec<CommentThread> {
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut threads: Vec<CommentThread> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();
        let mut replies = Vec::new();

        for comment in comments {
            if comment.parent_id.is_some() {
                replies.push(comment);
            } else {
                index.insert(comment.id, threads.len());
                threads.push(CommentThread {
                    comment,
                    replies: Vec::new(),
                });
            }
        }

        for reply in replies {
            let slot = reply.parent_id.and_then(|parent| index.get(&parent).copied());
            if let Some(slot) = slot {
                threads[slot].replies.push(reply);
            }
        }

        threads
    }
}
