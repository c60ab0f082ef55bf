use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::chat::ChatService;
use crate::app::communities::CommunityService;
use crate::app::engagement::EngagementService;
use crate::app::feed::{FeedQuery, FeedService};
use crate::app::moderation::ModerationService;
use crate::app::posts::PostService;
use crate::app::ranking::{project, SortMode};
use crate::app::social::SocialService;
use crate::app::suggestions::{SuggestionService, Suggestions};
use crate::domain::chat::ChatMessage;
use crate::domain::engagement::{Comment, CommentThread, Like, LikeColor};
use crate::domain::moderation::ModerationAction;
use crate::domain::post::{FeedCursor, NewPost, Post, PostCounts, PostVisibility};
use crate::http::{AdminToken, AppError, AuthUser};
use crate::AppState;

const MAX_LIST_LIMIT: i64 = 100;
const MAX_COUNT_IDS: usize = 100;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<FeedCursor>, AppError> {
    cursor
        .map(|raw| FeedCursor::parse(raw).ok_or_else(|| AppError::bad_request("invalid cursor")))
        .transpose()
}

fn list_limit(limit: Option<i64>) -> Result<i64, AppError> {
    let limit = limit.unwrap_or(30);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }
    Ok(limit)
}

/// Splits off the extra row fetched past `limit` and returns the cursor of
/// the last row kept, if there are more.
fn page_tail<T>(
    items: &mut Vec<T>,
    limit: i64,
    key: impl Fn(&T) -> FeedCursor,
) -> Option<String> {
    if items.len() <= limit as usize {
        return None;
    }
    items.truncate(limit as usize);
    items.last().map(key).and_then(|cursor| cursor.encode())
}

fn communities(state: &AppState) -> CommunityService {
    CommunityService::new(
        state.db.clone(),
        state.cache.clone(),
        state.feed.membership_cache_ttl_seconds,
    )
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

#[derive(Deserialize)]
pub struct FeedParams {
    pub sort: Option<SortMode>,
    pub tag: Option<String>,
    pub community_id: Option<Uuid>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct FeedResponse {
    pub items: Vec<Post>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub sort: SortMode,
}

pub async fn feed(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<FeedResponse>, AppError> {
    let settings = state.feed;
    let limit = params.limit.unwrap_or(settings.page_size);
    if !(1..=settings.max_page_size).contains(&limit) {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {}",
            settings.max_page_size
        )));
    }
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let query = FeedQuery::new(params.tag.as_deref(), params.community_id);
    let sort = params.sort.unwrap_or_default();

    let service = FeedService::new(state.db.clone(), state.cache.clone(), settings);
    let page = service
        .fetch_page(auth.user_id, &query, cursor, limit)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to fetch feed");
            AppError::internal("failed to fetch feed")
        })?;

    Ok(Json(FeedResponse {
        items: project(&page.posts, sort),
        next_cursor: page.next_cursor.and_then(|cursor| cursor.encode()),
        has_more: page.has_more,
        sort,
    }))
}

pub async fn suggestions(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Suggestions>, AppError> {
    let service = SuggestionService::new(state.db.clone());
    let suggestions = service
        .suggest(
            auth.user_id,
            state.feed.suggestion_like_window,
            state.feed.suggestion_limit,
        )
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to compute suggestions");
            AppError::internal("failed to compute suggestions")
        })?;

    Ok(Json(suggestions))
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default)]
    pub visibility: Option<PostVisibility>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub community_id: Option<Uuid>,
}

pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<Json<Post>, AppError> {
    let new_post = NewPost {
        content: payload.content,
        visibility: payload.visibility.unwrap_or(PostVisibility::Public),
        media_urls: payload.media_urls,
        hashtags: payload.hashtags,
        community_id: payload.community_id,
    };

    let service = PostService::new(state.db.clone());
    let post = service
        .create_post(auth.user_id, new_post)
        .await
        .map_err(|err| AppError::from_service(err, "failed to create post"))?;

    tracing::info!(post_id = %post.id, author_id = %auth.user_id, "post created");
    Ok(Json(post))
}

pub async fn get_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Post>, AppError> {
    let service = PostService::new(state.db.clone());
    let post = service.get_post(id, auth.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to fetch post");
        AppError::internal("failed to fetch post")
    })?;

    match post {
        Some(post) => Ok(Json(post)),
        None => Err(AppError::not_found("post not found")),
    }
}

pub async fn delete_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = PostService::new(state.db.clone());
    let deleted = service.delete_post(id, auth.user_id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to delete post");
        AppError::internal("failed to delete post")
    })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("post not found"))
    }
}

#[derive(Deserialize, Default)]
pub struct LikeRequest {
    #[serde(default)]
    pub color: LikeColor,
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub created: bool,
    pub color: LikeColor,
}

pub async fn like_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    payload: Option<Json<LikeRequest>>,
) -> Result<Json<LikeResponse>, AppError> {
    let color = payload.map(|Json(request)| request.color).unwrap_or_default();

    let service = EngagementService::new(state.db.clone());
    let outcome = service
        .like_post(auth.user_id, id, color)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, post_id = %id, "failed to like post");
            AppError::internal("failed to like post")
        })?
        .ok_or_else(|| AppError::not_found("post not found"))?;

    Ok(Json(LikeResponse {
        created: outcome.created,
        color: outcome.color,
    }))
}

pub async fn unlike_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = EngagementService::new(state.db.clone());
    let deleted = service
        .unlike_post(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, post_id = %id, "failed to unlike post");
            AppError::internal("failed to unlike post")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("like not found"))
    }
}

pub async fn list_post_likes(
    Path(id): Path<Uuid>,
    _auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Like>>, AppError> {
    let limit = list_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor.as_deref())?;

    let service = EngagementService::new(state.db.clone());
    let mut likes = service
        .list_likes(id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to list likes");
            AppError::internal("failed to list likes")
        })?;

    let next_cursor = page_tail(&mut likes, limit, |like| FeedCursor::new(like.created_at, like.user_id));

    Ok(Json(ListResponse {
        items: likes,
        next_cursor,
    }))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

pub async fn comment_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let service = EngagementService::new(state.db.clone());
    let comment = service
        .comment_post(auth.user_id, id, payload.content, payload.parent_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to comment"))?;

    Ok(Json(comment))
}

pub async fn list_post_comments(
    Path(id): Path<Uuid>,
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<CommentThread>>, AppError> {
    let service = EngagementService::new(state.db.clone());
    let threads = service.list_threads(id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to list comments");
        AppError::internal("failed to list comments")
    })?;

    Ok(Json(ListResponse {
        items: threads,
        next_cursor: None,
    }))
}

pub async fn delete_comment(
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = EngagementService::new(state.db.clone());
    let removed = service
        .delete_comment(comment_id, post_id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %comment_id, user_id = %auth.user_id, "failed to delete comment");
            AppError::internal("failed to delete comment")
        })?;

    if removed > 0 {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("comment not found"))
    }
}

#[derive(Deserialize)]
pub struct CountsRequest {
    pub post_ids: Vec<Uuid>,
}

pub async fn post_counts(
    _auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CountsRequest>,
) -> Result<Json<ListResponse<PostCounts>>, AppError> {
    if payload.post_ids.len() > MAX_COUNT_IDS {
        return Err(AppError::bad_request(format!(
            "at most {} post ids per request",
            MAX_COUNT_IDS
        )));
    }

    let service = EngagementService::new(state.db.clone());
    let counts = service
        .authoritative_counts(&payload.post_ids)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to load post counts");
            AppError::internal("failed to load post counts")
        })?;

    Ok(Json(ListResponse {
        items: counts,
        next_cursor: None,
    }))
}

#[derive(Serialize)]
pub struct FollowResponse {
    pub followed: bool,
}

pub async fn follow_user(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<FollowResponse>, AppError> {
    let service = SocialService::new(state.db.clone());
    let followed = service
        .follow(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to follow user"))?;

    Ok(Json(FollowResponse { followed }))
}

#[derive(Serialize)]
pub struct UnfollowResponse {
    pub unfollowed: bool,
}

pub async fn unfollow_user(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UnfollowResponse>, AppError> {
    let service = SocialService::new(state.db.clone());
    let unfollowed = service.unfollow(auth.user_id, id).await.map_err(|err| {
        tracing::error!(error = ?err, follower_id = %auth.user_id, followee_id = %id, "failed to unfollow user");
        AppError::internal("failed to unfollow user")
    })?;

    Ok(Json(UnfollowResponse { unfollowed }))
}

#[derive(Serialize)]
pub struct MembershipResponse {
    pub member: bool,
    pub changed: bool,
}

pub async fn join_community(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MembershipResponse>, AppError> {
    let changed = communities(&state)
        .join(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to join community"))?;

    Ok(Json(MembershipResponse {
        member: true,
        changed,
    }))
}

pub async fn leave_community(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MembershipResponse>, AppError> {
    let changed = communities(&state)
        .leave(auth.user_id, id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to leave community"))?;

    Ok(Json(MembershipResponse {
        member: false,
        changed,
    }))
}

pub async fn list_messages(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<ChatMessage>>, AppError> {
    let limit = list_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor.as_deref())?;

    let service = communities(&state);
    let community_id = service
        .channel_community(id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to list messages"))?
        .ok_or_else(|| AppError::not_found("channel not found"))?;
    let is_member = service
        .is_member(auth.user_id, community_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to list messages"))?;
    if !is_member {
        return Err(AppError::forbidden("not a member of this community"));
    }

    let mut messages = ChatService::new(state.db.clone())
        .list_messages(id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, channel_id = %id, "failed to list messages");
            AppError::internal("failed to list messages")
        })?;

    let next_cursor = page_tail(&mut messages, limit, |message| {
        FeedCursor::new(message.created_at, message.id)
    });

    Ok(Json(ListResponse {
        items: messages,
        next_cursor,
    }))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

pub async fn send_message(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<ChatMessage>, AppError> {
    let message = ChatService::new(state.db.clone())
        .send_message(id, auth.user_id, payload.content)
        .await
        .map_err(|err| AppError::from_service(err, "failed to send message"))?;

    Ok(Json(message))
}

#[derive(Deserialize, Default)]
pub struct ModerationRequest {
    pub reason: Option<String>,
}

pub async fn hide_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    _admin: AdminToken,
    State(state): State<AppState>,
    payload: Option<Json<ModerationRequest>>,
) -> Result<StatusCode, AppError> {
    let reason = payload.and_then(|Json(request)| request.reason);
    let hidden = ModerationService::new(state.db.clone())
        .hide_post(auth.user_id, id, reason)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, actor_id = %auth.user_id, post_id = %id, "failed to hide post");
            AppError::internal("failed to hide post")
        })?;

    if hidden {
        tracing::info!(actor_id = %auth.user_id, post_id = %id, "post hidden");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("post not found"))
    }
}

pub async fn unhide_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    _admin: AdminToken,
    State(state): State<AppState>,
    payload: Option<Json<ModerationRequest>>,
) -> Result<StatusCode, AppError> {
    let reason = payload.and_then(|Json(request)| request.reason);
    let restored = ModerationService::new(state.db.clone())
        .unhide_post(auth.user_id, id, reason)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, actor_id = %auth.user_id, post_id = %id, "failed to unhide post");
            AppError::internal("failed to unhide post")
        })?;

    if restored {
        tracing::info!(actor_id = %auth.user_id, post_id = %id, "post restored");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("hidden post not found"))
    }
}

pub async fn list_moderation_audit(
    _auth: AuthUser,
    _admin: AdminToken,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<ModerationAction>>, AppError> {
    let limit = list_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor.as_deref())?;

    let mut actions = ModerationService::new(state.db.clone())
        .list_audit(cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list moderation audit");
            AppError::internal("failed to list moderation audit")
        })?;

    let next_cursor = page_tail(&mut actions, limit, |action| FeedCursor::new(action.created_at, action.id));

    Ok(Json(ListResponse {
        items: actions,
        next_cursor,
    }))
}
