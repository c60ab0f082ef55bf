//! Client-side sort projections over an already loaded window of posts.
//! Nothing here fetches: re-sorting never changes which posts are loaded.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::post::Post;

/// Scales epoch milliseconds down to a term in the hundreds to low
/// thousands, so recency only separates posts with near-equal engagement.
pub const RECENCY_DIVISOR: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Newest,
    Trending,
}

pub fn trending_score(post: &Post) -> f64 {
    let engagement = (post.likes_count + post.comments_count) as f64;
    engagement + post.created_at_ms() as f64 / RECENCY_DIVISOR
}

fn newest_first(a: &Post, b: &Post) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

fn trending_first(a: &Post, b: &Post) -> Ordering {
    trending_score(b).total_cmp(&trending_score(a))
}

/// Sorts in place. Stable, so equal keys keep their window order.
pub fn sort_window(posts: &mut [Post], mode: SortMode) {
    match mode {
        SortMode::Newest => posts.sort_by(newest_first),
        SortMode::Trending => posts.sort_by(trending_first),
    }
}

pub fn project(posts: &[Post], mode: SortMode) -> Vec<Post> {
    let mut projected = posts.to_vec();
    sort_window(&mut projected, mode);
    projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::post::PostVisibility;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn post(id: u128, likes: i64, comments: i64, at_ms: i64) -> Post {
        Post {
            id: Uuid::from_u128(id),
            author_id: Uuid::from_u128(1000),
            author: None,
            content: String::new(),
            visibility: PostVisibility::Public,
            created_at: OffsetDateTime::from_unix_timestamp_nanos(at_ms as i128 * 1_000_000)
                .unwrap(),
            media_urls: Vec::new(),
            hashtags: Vec::new(),
            community_id: None,
            likes_count: likes,
            comments_count: comments,
        }
    }

    fn ids(posts: &[Post]) -> Vec<u128> {
        posts.iter().map(|p| p.id.as_u128()).collect()
    }

    #[test]
    fn engagement_outranks_recency() {
        let window = vec![post(1, 2, 0, 100), post(2, 0, 5, 200)];
        assert!((trending_score(&window[0]) - 2.0001).abs() < 1e-9);
        assert!((trending_score(&window[1]) - 5.0002).abs() < 1e-9);
        assert_eq!(ids(&project(&window, SortMode::Trending)), vec![2, 1]);
    }

    #[test]
    fn recency_breaks_engagement_ties() {
        let day_ms = 86_400_000;
        let window = vec![
            post(1, 3, 0, 1_700_000_000_000),
            post(2, 1, 2, 1_700_000_000_000 + day_ms),
        ];
        assert_eq!(ids(&project(&window, SortMode::Trending)), vec![2, 1]);
    }

    #[test]
    fn newest_is_non_increasing_in_time() {
        let window = vec![
            post(1, 0, 0, 300),
            post(2, 9, 9, 100),
            post(3, 0, 0, 500),
            post(4, 0, 0, 300),
        ];
        let sorted = project(&window, SortMode::Newest);
        assert!(sorted
            .windows(2)
            .all(|pair| pair[0].created_at >= pair[1].created_at));
        assert_eq!(ids(&sorted), vec![3, 4, 1, 2]);
    }

    #[test]
    fn trending_is_deterministic_for_equal_windows() {
        let window = vec![
            post(1, 1, 1, 100),
            post(2, 2, 0, 100),
            post(3, 0, 2, 100),
            post(4, 5, 0, 50),
        ];
        let first = project(&window, SortMode::Trending);
        let second = project(&window, SortMode::Trending);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec![4, 1, 2, 3]);
    }

    #[test]
    fn projection_leaves_the_window_untouched() {
        let window = vec![post(1, 0, 0, 100), post(2, 0, 0, 200)];
        let _ = project(&window, SortMode::Newest);
        assert_eq!(ids(&window), vec![1, 2]);
    }
}
