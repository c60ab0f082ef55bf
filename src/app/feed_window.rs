//! A locally held window of feed posts: keyset pagination, live inserts and
//! optimistic engagement counts that are periodically reconciled.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::engagement::EngagementService;
use crate::app::feed::{FeedPage, FeedQuery, FeedService};
use crate::app::ranking::{project, SortMode};
use crate::domain::engagement::{Comment, LikeColor};
use crate::domain::post::{FeedCursor, Post, PostCounts};

/// Remote operations a window is driven by.
pub trait FeedSource: Send + Sync {
    fn fetch_page(
        &self,
        cursor: Option<FeedCursor>,
        limit: i64,
    ) -> impl Future<Output = Result<FeedPage>> + Send;

    fn fetch_counts(&self, post_ids: &[Uuid])
        -> impl Future<Output = Result<Vec<PostCounts>>> + Send;

    /// Returns whether a new like was created (false if it only recolored).
    fn like(&self, post_id: Uuid, color: LikeColor) -> impl Future<Output = Result<bool>> + Send;

    /// Returns whether a like was removed.
    fn unlike(&self, post_id: Uuid) -> impl Future<Output = Result<bool>> + Send;

    fn comment(
        &self,
        post_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> impl Future<Output = Result<Comment>> + Send;
}

/// The service-backed source for one viewer and one feed query.
#[derive(Clone)]
pub struct ViewerFeed {
    feed: FeedService,
    engagement: EngagementService,
    viewer_id: Uuid,
    query: FeedQuery,
}

impl ViewerFeed {
    pub fn new(
        feed: FeedService,
        engagement: EngagementService,
        viewer_id: Uuid,
        query: FeedQuery,
    ) -> Self {
        Self {
            feed,
            engagement,
            viewer_id,
            query,
        }
    }
}

impl FeedSource for ViewerFeed {
    async fn fetch_page(&self, cursor: Option<FeedCursor>, limit: i64) -> Result<FeedPage> {
        self.feed
            .fetch_page(self.viewer_id, &self.query, cursor, limit)
            .await
    }

    async fn fetch_counts(&self, post_ids: &[Uuid]) -> Result<Vec<PostCounts>> {
        self.engagement.authoritative_counts(post_ids).await
    }

    async fn like(&self, post_id: Uuid, color: LikeColor) -> Result<bool> {
        match self
            .engagement
            .like_post(self.viewer_id, post_id, color)
            .await?
        {
            Some(outcome) => Ok(outcome.created),
            None => Err(anyhow::anyhow!("post not found")),
        }
    }

    async fn unlike(&self, post_id: Uuid) -> Result<bool> {
        self.engagement.unlike_post(self.viewer_id, post_id).await
    }

    async fn comment(
        &self,
        post_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> Result<Comment> {
        self.engagement
            .comment_post(self.viewer_id, post_id, content, parent_id)
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowPhase {
    Idle,
    Loading,
    LoadingMore,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing older to fetch.
    Exhausted,
    /// Another fetch was already running; this call did nothing.
    Coalesced,
    /// A `load()` replaced the window while this page was in flight.
    Discarded,
    /// Number of new posts appended.
    Appended(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CountDelta {
    likes: i64,
    comments: i64,
}

impl CountDelta {
    const LIKE: Self = Self {
        likes: 1,
        comments: 0,
    };
    const UNLIKE: Self = Self {
        likes: -1,
        comments: 0,
    };
    const COMMENT: Self = Self {
        likes: 0,
        comments: 1,
    };

    fn negate(self) -> Self {
        Self {
            likes: -self.likes,
            comments: -self.comments,
        }
    }

    fn is_zero(&self) -> bool {
        self.likes == 0 && self.comments == 0
    }
}

#[derive(Debug)]
struct WindowState {
    posts: Vec<Post>,
    ids: HashSet<Uuid>,
    cursor: Option<FeedCursor>,
    has_more: bool,
    phase: WindowPhase,
    generation: u64,
    /// Deltas of engagement calls that have not settled yet.
    pending: HashMap<Uuid, CountDelta>,
    /// Like state observed during this window's lifetime.
    liked: HashMap<Uuid, bool>,
}

impl WindowState {
    fn new() -> Self {
        Self {
            posts: Vec::new(),
            ids: HashSet::new(),
            cursor: None,
            has_more: false,
            phase: WindowPhase::Idle,
            generation: 0,
            pending: HashMap::new(),
            liked: HashMap::new(),
        }
    }

    fn post_mut(&mut self, post_id: Uuid) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| post.id == post_id)
    }

    fn shift_counts(&mut self, post_id: Uuid, delta: CountDelta) {
        if let Some(post) = self.post_mut(post_id) {
            post.likes_count += delta.likes;
            post.comments_count += delta.comments;
        }
    }

    fn shift_pending(&mut self, post_id: Uuid, delta: CountDelta) {
        let entry = self.pending.entry(post_id).or_default();
        entry.likes += delta.likes;
        entry.comments += delta.comments;
        if entry.is_zero() {
            self.pending.remove(&post_id);
        }
    }

    /// Optimistically applies `delta` and records it as pending.
    fn apply(&mut self, post_id: Uuid, delta: CountDelta) {
        self.shift_counts(post_id, delta);
        self.shift_pending(post_id, delta);
    }

    /// The remote call confirmed `delta`; the count stays.
    fn settle(&mut self, post_id: Uuid, delta: CountDelta) {
        self.shift_pending(post_id, delta.negate());
    }

    /// The remote call failed or disagreed; the count goes back.
    fn revert(&mut self, post_id: Uuid, delta: CountDelta) {
        self.shift_counts(post_id, delta.negate());
        self.shift_pending(post_id, delta.negate());
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    /// Claims the flag, or returns `None` if it is already held.
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FeedWindow<S> {
    source: S,
    page_size: i64,
    state: Mutex<WindowState>,
    loading_more: AtomicBool,
}

impl<S: FeedSource> FeedWindow<S> {
    pub fn new(source: S, page_size: i64) -> Self {
        Self {
            source,
            page_size,
            state: Mutex::new(WindowState::new()),
            loading_more: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Replaces the window with the first page. Returns the number of posts
    /// loaded; a load overtaken by a newer one reports zero.
    pub async fn load(&self) -> Result<usize> {
        let generation = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.phase = WindowPhase::Loading;
            state.generation
        };

        let page = self.source.fetch_page(None, self.page_size).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, "discarding superseded feed load");
            return Ok(0);
        }

        match page {
            Ok(page) => {
                let loaded = page.posts.len();
                state.ids = page.posts.iter().map(|post| post.id).collect();
                state.posts = page.posts;
                state.cursor = page.next_cursor;
                state.has_more = page.has_more;
                state.phase = WindowPhase::Idle;
                debug!(loaded, has_more = state.has_more, "loaded feed window");
                Ok(loaded)
            }
            Err(err) => {
                warn!(error = ?err, "failed to load feed window");
                state.phase = WindowPhase::Error(err.to_string());
                Err(err)
            }
        }
    }

    /// Appends the page strictly older than the current cursor.
    pub async fn load_more(&self) -> Result<LoadOutcome> {
        let Some(_in_flight) = InFlight::claim(&self.loading_more) else {
            return Ok(LoadOutcome::Coalesced);
        };

        let (cursor, generation) = {
            let mut state = self.state.lock().await;
            if state.phase == WindowPhase::Loading {
                return Ok(LoadOutcome::Coalesced);
            }
            let Some(cursor) = state.cursor.filter(|_| state.has_more) else {
                return Ok(LoadOutcome::Exhausted);
            };
            state.phase = WindowPhase::LoadingMore;
            (cursor, state.generation)
        };

        let page = self.source.fetch_page(Some(cursor), self.page_size).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, "discarding page fetched before a reload");
            return Ok(LoadOutcome::Discarded);
        }

        let page = match page {
            Ok(page) => page,
            Err(err) => {
                warn!(error = ?err, "failed to load more posts");
                state.phase = WindowPhase::Error(err.to_string());
                return Err(err);
            }
        };

        state.phase = WindowPhase::Idle;

        if page.posts.is_empty() {
            state.cursor = None;
            state.has_more = false;
            return Ok(LoadOutcome::Exhausted);
        }

        let mut appended = 0;
        for post in page.posts {
            if state.ids.insert(post.id) {
                state.posts.push(post);
                appended += 1;
            }
        }

        // A source that returns newer rows must not move the cursor forward.
        state.cursor = match (page.next_cursor, state.cursor) {
            (Some(next), Some(current)) => Some(next.min(current)),
            (next, _) => next,
        };
        state.has_more = page.has_more;

        debug!(appended, has_more = state.has_more, "appended feed page");
        Ok(LoadOutcome::Appended(appended))
    }

    /// Puts a realtime insert at the head of the window. Returns false when
    /// the post is already present.
    pub async fn insert_live(&self, post: Post) -> bool {
        let mut state = self.state.lock().await;
        if !state.ids.insert(post.id) {
            return false;
        }
        state.posts.insert(0, post);
        true
    }

    pub async fn posts(&self, sort: SortMode) -> Vec<Post> {
        let state = self.state.lock().await;
        project(&state.posts, sort)
    }

    pub async fn get(&self, post_id: Uuid) -> Option<Post> {
        let state = self.state.lock().await;
        state.posts.iter().find(|post| post.id == post_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.posts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn phase(&self) -> WindowPhase {
        self.state.lock().await.phase.clone()
    }

    pub async fn cursor(&self) -> Option<FeedCursor> {
        self.state.lock().await.cursor
    }

    pub async fn has_more(&self) -> bool {
        self.state.lock().await.has_more
    }

    pub async fn like(&self, post_id: Uuid, color: LikeColor) -> Result<()> {
        let applied = {
            let mut state = self.state.lock().await;
            let known_liked = state.liked.get(&post_id).copied() == Some(true);
            if !known_liked {
                state.apply(post_id, CountDelta::LIKE);
            }
            state.liked.insert(post_id, true);
            !known_liked
        };

        let result = self.source.like(post_id, color).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(created) => {
                if applied {
                    if created {
                        state.settle(post_id, CountDelta::LIKE);
                    } else {
                        state.revert(post_id, CountDelta::LIKE);
                    }
                } else if created {
                    state.shift_counts(post_id, CountDelta::LIKE);
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = ?err, post_id = %post_id, "like failed, reverting");
                if applied {
                    state.revert(post_id, CountDelta::LIKE);
                    state.liked.remove(&post_id);
                }
                Err(err)
            }
        }
    }

    pub async fn unlike(&self, post_id: Uuid) -> Result<()> {
        let applied = {
            let mut state = self.state.lock().await;
            let known_unliked = state.liked.get(&post_id).copied() == Some(false);
            let has_likes = state
                .posts
                .iter()
                .any(|post| post.id == post_id && post.likes_count > 0);
            let apply = !known_unliked && has_likes;
            if apply {
                state.apply(post_id, CountDelta::UNLIKE);
            }
            state.liked.insert(post_id, false);
            apply
        };

        let result = self.source.unlike(post_id).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(removed) => {
                if applied {
                    if removed {
                        state.settle(post_id, CountDelta::UNLIKE);
                    } else {
                        state.revert(post_id, CountDelta::UNLIKE);
                    }
                } else if removed {
                    state.shift_counts(post_id, CountDelta::UNLIKE);
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = ?err, post_id = %post_id, "unlike failed, reverting");
                if applied {
                    state.revert(post_id, CountDelta::UNLIKE);
                    state.liked.remove(&post_id);
                }
                Err(err)
            }
        }
    }

    pub async fn comment(
        &self,
        post_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> Result<Comment> {
        self.state
            .lock()
            .await
            .apply(post_id, CountDelta::COMMENT);

        let result = self.source.comment(post_id, content, parent_id).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(comment) => {
                state.settle(post_id, CountDelta::COMMENT);
                Ok(comment)
            }
            Err(err) => {
                warn!(error = ?err, post_id = %post_id, "comment failed, reverting");
                state.revert(post_id, CountDelta::COMMENT);
                Err(err)
            }
        }
    }

    /// Overwrites window counts with authoritative ones, keeping the deltas
    /// of engagement calls still in flight. Returns how many posts changed.
    pub async fn reconcile_counts(&self) -> Result<usize> {
        let post_ids: Vec<Uuid> = {
            let state = self.state.lock().await;
            state.posts.iter().map(|post| post.id).collect()
        };
        if post_ids.is_empty() {
            return Ok(0);
        }

        let counts = match self.source.fetch_counts(&post_ids).await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(error = ?err, "failed to fetch authoritative counts");
                return Err(err);
            }
        };

        let mut state = self.state.lock().await;
        let mut changed = 0;
        for counts in counts {
            let pending = state
                .pending
                .get(&counts.post_id)
                .copied()
                .unwrap_or_default();
            let Some(post) = state.post_mut(counts.post_id) else {
                continue;
            };
            let likes = counts.likes_count + pending.likes;
            let comments = counts.comments_count + pending.comments;
            if post.likes_count != likes || post.comments_count != comments {
                post.likes_count = likes;
                post.comments_count = comments;
                changed += 1;
            }
        }

        debug!(checked = post_ids.len(), changed, "reconciled window counts");
        Ok(changed)
    }
}
