use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Failures of the persistence and account endpoints.
///
/// Chat proxy failures do not go through here; they are rendered as regular
/// payloads by the chat handler.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => make_error_response(StatusCode::BAD_REQUEST, message),
            AppError::Unauthorized(message) => {
                let mut response = make_error_response(StatusCode::UNAUTHORIZED, message);
                apply_header(response.headers_mut(), "www-authenticate", "Bearer");
                response
            }
            AppError::Forbidden(message) => make_error_response(StatusCode::FORBIDDEN, message),
            AppError::NotFound(message) => make_error_response(StatusCode::NOT_FOUND, message),
            AppError::Internal(message) => {
                error!(error = %message, "request failed");
                make_error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => AppError::NotFound(capitalize(&format!("{what} not found"))),
            StoreError::Conflict(message) => AppError::BadRequest(message),
            StoreError::Database(message) => AppError::Internal(message),
        }
    }
}

fn make_error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorDetail { detail: message })).into_response()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn apply_header(headers: &mut axum::http::HeaderMap, name: &str, value: &str) {
    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        return;
    };
    let Ok(header_value) = HeaderValue::from_str(value) else {
        return;
    };
    headers.insert(header_name, header_value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_read_like_sentences() {
        let error = AppError::from(StoreError::NotFound("chat session"));
        assert_eq!(error.to_string(), "Chat session not found");
    }

    #[test]
    fn unauthorized_carries_bearer_challenge() {
        let response = AppError::Unauthorized("nope".to_owned()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get("www-authenticate")
                .and_then(|value| value.to_str().ok()),
            Some("Bearer")
        );
    }
}
