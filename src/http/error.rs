use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app::{chat, engagement, posts};

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Refusals services raise as plain messages, and how each reaches a client.
const REFUSALS: &[(&str, StatusCode)] = &[
    ("post not found", StatusCode::NOT_FOUND),
    ("parent comment not found", StatusCode::NOT_FOUND),
    ("channel not found", StatusCode::NOT_FOUND),
    ("community not found", StatusCode::NOT_FOUND),
    ("not a member of this community", StatusCode::FORBIDDEN),
    ("replies cannot be nested", StatusCode::BAD_REQUEST),
    ("cannot follow yourself", StatusCode::BAD_REQUEST),
    (posts::EMPTY_CONTENT, StatusCode::BAD_REQUEST),
    (posts::CONTENT_TOO_LONG, StatusCode::BAD_REQUEST),
    (posts::TOO_MANY_MEDIA_URLS, StatusCode::BAD_REQUEST),
    (engagement::EMPTY_COMMENT, StatusCode::BAD_REQUEST),
    (engagement::COMMENT_TOO_LONG, StatusCode::BAD_REQUEST),
    (chat::EMPTY_MESSAGE, StatusCode::BAD_REQUEST),
    (chat::MESSAGE_TOO_LONG, StatusCode::BAD_REQUEST),
];

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Maps a service error to a response. Known refusals keep their
    /// message; anything else is logged and reported as `fallback`.
    pub fn from_service(err: anyhow::Error, fallback: &str) -> Self {
        let message = err.to_string();
        if let Some((refusal, status)) = REFUSALS
            .iter()
            .find(|(refusal, _)| message.contains(refusal))
        {
            return Self {
                status: *status,
                message: (*refusal).to_string(),
            };
        }

        tracing::error!(error = ?err, "{}", fallback);
        Self::internal(fallback)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_keep_their_status() {
        let err = AppError::from_service(anyhow::anyhow!("not a member of this community"), "x");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = AppError::from_service(anyhow::anyhow!("replies cannot be nested"), "x");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "replies cannot be nested");
    }

    #[test]
    fn content_limits_are_client_errors() {
        let err = crate::app::engagement::validate_comment("").unwrap_err();
        let err = AppError::from_service(err, "failed to comment");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "comment cannot be empty");
    }

    #[test]
    fn unknown_errors_are_masked() {
        let err = AppError::from_service(
            anyhow::anyhow!("connection reset by peer"),
            "failed to like post",
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "failed to like post");
    }
}
