//! HTTP API routes for DraftDesk
//!
//! One editor session per server. Handlers lock the session only to start
//! and to finish an operation; the backend call itself runs unlocked.

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

pub mod session;

use crate::app_state::AppState;
use crate::attachment::AttachmentError;
use crate::config::ConfigError;
use crate::session::SessionError;
use crate::suggestions::SuggestionError;

/// Room for instructions and JSON framing around the attachment payload.
const BODY_HEADROOM_BYTES: usize = 1024 * 1024;

/// Largest request body accepted: one attachment of `max_attachment_bytes`
/// after base64 inflation, plus headroom.
pub fn body_limit(max_attachment_bytes: usize) -> usize {
    max_attachment_bytes
        .saturating_add(2)
        .saturating_div(3)
        .saturating_mul(4)
        .saturating_add(BODY_HEADROOM_BYTES)
}

/// Configure all API routes
pub fn router(max_attachment_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/session", get(session::get_session))
        .route("/session/document", put(session::replace_document))
        .route("/session/start-blank", post(session::start_blank))
        .route("/session/draft", post(session::draft))
        .route("/session/draft/retry", post(session::retry_draft))
        .route("/session/cancel", post(session::cancel))
        .route(
            "/session/selection",
            post(session::select)
                .patch(session::selection_changing)
                .delete(session::clear_selection),
        )
        .route("/session/refine", post(session::refine))
        .route("/session/scan", post(session::scan))
        .route(
            "/session/suggestions/{id}/apply",
            post(session::apply_suggestion),
        )
        .route(
            "/session/suggestions/{id}",
            delete(session::dismiss_suggestion),
        )
        .route("/session/render", get(session::render))
        .route(
            "/session/structured",
            get(session::structured_view).put(session::commit_structured_edit),
        )
        .route(
            "/session/structured/edit",
            post(session::begin_structured_edit).delete(session::cancel_structured_edit),
        )
        .route("/session/export", get(session::export))
        .route("/session/notices", get(session::drain_notices))
        .layer(DefaultBodyLimit::max(body_limit(max_attachment_bytes)))
}

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "draftdesk",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    Busy,
    NoSelection,
    NotConfigured,
    NotFound,
    InvalidAttachment,
    InvalidRequest,
}

impl ApiErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorCode::Busy => "BUSY",
            ApiErrorCode::NoSelection => "NO_SELECTION",
            ApiErrorCode::NotConfigured => "NOT_CONFIGURED",
            ApiErrorCode::NotFound => "NOT_FOUND",
            ApiErrorCode::InvalidAttachment => "INVALID_ATTACHMENT",
            ApiErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiErrorCode::Busy => StatusCode::CONFLICT,
            ApiErrorCode::NoSelection => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InvalidAttachment => StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorResponse {
            error: ApiErrorDetail {
                code: self.code.as_str(),
                message: self.message,
            },
        });
        (self.code.status_code(), body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        let code = match &error {
            SessionError::Busy(_) => ApiErrorCode::Busy,
            SessionError::NoSelection => ApiErrorCode::NoSelection,
            SessionError::Suggestion(SuggestionError::NotFound(_)) => ApiErrorCode::NotFound,
            SessionError::NothingToRetry
            | SessionError::InvalidRequest(_)
            | SessionError::Suggestion(SuggestionError::Stale(_)) => ApiErrorCode::InvalidRequest,
        };
        Self::new(code, error.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(error: ConfigError) -> Self {
        Self::new(ApiErrorCode::NotConfigured, error.to_string())
    }
}

impl From<AttachmentError> for ApiError {
    fn from(error: AttachmentError) -> Self {
        Self::new(ApiErrorCode::InvalidAttachment, error.to_string())
    }
}
