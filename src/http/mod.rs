use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;
mod stream;

pub use auth::{AdminToken, AuthUser};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::feed())
        .merge(routes::posts())
        .merge(routes::users())
        .merge(routes::communities())
        .merge(routes::channels())
        .merge(routes::moderation());

    Router::new()
        .merge(routes::health())
        .nest("/v1", api)
        .with_state(state)
}
