use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::apple::AppleError;
use crate::auth::AuthError;
use crate::supabase::StoreError;
use crate::upstream::UpstreamError;

pub const GENERIC_PROCESSING_ERROR: &str = "Failed to process your request";
pub const GENERIC_BAD_REQUEST_ERROR: &str = "Bad Input Request";

/// Errors that end a request. Internal causes are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("inference: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("model output was not a JSON object: {0}")]
    MalformedAnswer(#[from] serde_json::Error),
    #[error("sign in with apple: {0}")]
    Apple(#[from] AppleError),
    #[error("session token: {0}")]
    Token(#[from] AuthError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Store(_) => "Failed to process account request".to_string(),
            AppError::Upstream(_) | AppError::MalformedAnswer(_) => GENERIC_PROCESSING_ERROR.to_string(),
            AppError::Apple(_) => "Failed to get token from Apple".to_string(),
            AppError::Token(_) => "Failed to generate JWT token".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
