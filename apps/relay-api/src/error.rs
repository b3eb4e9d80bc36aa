use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "TOO_MANY_REQUESTS".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match &err {
            RelayError::Unauthenticated => Self::unauthorized("Authentication required"),
            RelayError::RateLimited => Self::too_many_requests("Too many requests"),
            _ => {
                tracing::error!(?err, "relay error");
                Self::internal("An internal error occurred")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(?err, "store error");
        Self::internal("An internal error occurred")
    }
}

/// Failures from the document store backing sessions, blocks and history.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Domain errors raised while relaying messages or completing sign-in.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no valid session bound to the connection")]
    Unauthenticated,

    #[error("subject is blocked")]
    Blocked {
        /// Expiry of the block; `None` when permanent.
        until: Option<DateTime<Utc>>,
        reason: String,
        permanent: bool,
    },

    #[error("message rate limit exceeded")]
    RateLimited,

    #[error("state token missing or already consumed")]
    StateMismatch,

    #[error("identity provider returned no access token")]
    NoAccessToken,

    #[error("identity provider returned no usable identity")]
    NoIdentity,

    #[error("identity provider request failed: {0}")]
    Upstream(String),

    #[error("support channel creation failed: {0}")]
    ChannelCreate(String),

    #[error("no connected visitor for channel {channel_id}")]
    TargetOffline { channel_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
