use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::{handlers, stream};
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn feed() -> Router<AppState> {
    Router::new()
        .route("/feed", get(handlers::feed))
        .route("/feed/suggestions", get(handlers::suggestions))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post))
        .route("/posts/counts", post(handlers::post_counts))
        .route("/posts/:id", get(handlers::get_post))
        .route("/posts/:id", delete(handlers::delete_post))
        .route("/posts/:id/like", post(handlers::like_post))
        .route("/posts/:id/like", delete(handlers::unlike_post))
        .route("/posts/:id/likes", get(handlers::list_post_likes))
        .route("/posts/:id/comments", get(handlers::list_post_comments))
        .route("/posts/:id/comments", post(handlers::comment_post))
        .route(
            "/posts/:id/comments/:comment_id",
            delete(handlers::delete_comment),
        )
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route("/users/:id/follow", post(handlers::follow_user))
        .route("/users/:id/unfollow", post(handlers::unfollow_user))
}

pub fn communities() -> Router<AppState> {
    Router::new()
        .route("/communities/:id/join", post(handlers::join_community))
        .route("/communities/:id/leave", post(handlers::leave_community))
        .route("/communities/:id/stream", get(stream::community_stream))
}

pub fn channels() -> Router<AppState> {
    Router::new()
        .route("/channels/:id/messages", get(handlers::list_messages))
        .route("/channels/:id/messages", post(handlers::send_message))
        .route("/channels/:id/stream", get(stream::channel_stream))
}

pub fn moderation() -> Router<AppState> {
    Router::new()
        .route("/moderation/posts/:id/hide", post(handlers::hide_post))
        .route("/moderation/posts/:id/unhide", post(handlers::unhide_post))
        .route("/moderation/audit", get(handlers::list_moderation_audit))
}
