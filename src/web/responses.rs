use std::fmt;

use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

pub const FORBIDDEN_MESSAGE: &str = "You do not have permission to perform this action.";
const UNAUTHORIZED_MESSAGE: &str = "You are not signed in.";
const INTERNAL_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// Canonical JSON envelope returned by every API endpoint.
#[derive(Debug, Serialize, Clone)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiEnvelope<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiEnvelope<T>>, ApiError>;

/// Wrap a payload in a successful envelope.
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiEnvelope::ok(data)))
}

/// Error taxonomy shared by all handlers.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadCredentials(&'static str),
    Forbidden(String),
    NotFound(String),
    Validation(String),
    Internal,
}

impl ApiError {
    pub fn forbidden() -> Self {
        ApiError::Forbidden(FORBIDDEN_MESSAGE.to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::BadCredentials(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized => UNAUTHORIZED_MESSAGE,
            ApiError::BadCredentials(message) => message,
            ApiError::Forbidden(message)
            | ApiError::NotFound(message)
            | ApiError::Validation(message) => message,
            ApiError::Internal => INTERNAL_MESSAGE,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiEnvelope::failure(self.message()))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        error!(?err, "database error while handling request");
        ApiError::Internal
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "internal error while handling request");
        ApiError::Internal
    }
}

/// Unwrap a JSON body, turning extractor rejections into enveloped 400s.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| {
            ApiError::validation(format!("Invalid request body: {}", rejection.body_text()))
        })
}

/// Same as [`json_body`] for query strings.
pub fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query.map(|Query(params)| params).map_err(|rejection| {
        ApiError::validation(format!("Invalid query parameters: {}", rejection.body_text()))
    })
}

/// True when the database rejected a write because of a unique constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}
