use crate::database::DirectoryError;
use crate::models::ResponseData;
use actix_web::error::JsonPayloadError;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use serde_json::error::Category;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to a backing store (Redis, or the IDM over HTTP).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("idm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend call exceeded {0:?}")]
    Timeout(Duration),
    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

/// Run a store call under `deadline`. Dropping the returned future abandons the call.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

/// Why a JSON request body was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("expected Content-Type: application/json")]
    ContentType,
    #[error("body is not valid JSON: {0}")]
    Syntax(String),
    #[error("body has the wrong shape: {0}")]
    Data(String),
    #[error("body ended unexpectedly")]
    Truncated,
    #[error("body exceeds the size limit")]
    TooLarge,
    #[error("body could not be read: {0}")]
    Unreadable(String),
}

impl From<&JsonPayloadError> for BodyError {
    fn from(err: &JsonPayloadError) -> Self {
        match err {
            JsonPayloadError::ContentType => BodyError::ContentType,
            JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                BodyError::TooLarge
            }
            JsonPayloadError::Deserialize(e) => match e.classify() {
                Category::Syntax => BodyError::Syntax(e.to_string()),
                Category::Data => BodyError::Data(e.to_string()),
                Category::Eof => BodyError::Truncated,
                Category::Io => BodyError::Unreadable(e.to_string()),
            },
            other => BodyError::Unreadable(other.to_string()),
        }
    }
}

/// `JsonConfig` error handler: classify, then answer 400 with the usual envelope.
pub fn json_error_handler(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    let body = BodyError::from(&err);
    tracing::debug!(path = %req.path(), error = %body, "rejected request body");
    ApiError::Body(body).into()
}

/// Handler outcome translated into the HTTP envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Body(BodyError),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("username or password are incorrect")]
    InvalidCredentials,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("user directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("{0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Body(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            // Unknown user and wrong password look the same
            ApiError::InvalidCredentials | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(_) | ApiError::Directory(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Backend details stay in the logs
        let error = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(ResponseData {
            message: status.canonical_reason().unwrap_or("Error").to_string(),
            error,
        })
    }
}
