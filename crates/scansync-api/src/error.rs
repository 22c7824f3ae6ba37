use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use scansync_core::protocol::ErrorBody;
use scansync_core::ValidationIssue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("{message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Too many requests: {0}")]
    TooManyRequests(String, u64),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::TooManyRequests(message.into(), retry_after_secs)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Body or query that did not deserialize; `detail` is the extractor's
    /// rejection text, which carries the failing field path when there is one.
    pub fn malformed(message: impl Into<String>, detail: &str) -> Self {
        let detail = ["target type: ", "query string: "]
            .iter()
            .find_map(|marker| detail.split_once(marker).map(|(_, rest)| rest))
            .unwrap_or(detail);
        let issue = match detail.split_once(": ") {
            Some((path, reason)) if !path.is_empty() && !path.contains(char::is_whitespace) => {
                ValidationIssue::new(path, reason)
            }
            _ => ValidationIssue::new("", detail),
        };
        Self::Validation {
            message: message.into(),
            issues: vec![issue],
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TooManyRequests(_, _) => StatusCode::TOO_MANY_REQUESTS,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<scansync_core::Error> for AppError {
    fn from(error: scansync_core::Error) -> Self {
        match error {
            scansync_core::Error::Validation { message, issues } => {
                Self::Validation { message, issues }
            }
            scansync_core::Error::InvalidInput(message) => Self::BadRequest(message),
            scansync_core::Error::NotFound(message) => Self::BadRequest(message),
            other => {
                // Storage details stay in the log
                tracing::error!(error = %other, "Sync storage failure");
                Self::internal("storage failure")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            Self::TooManyRequests(_, secs) => Some(*secs),
            _ => None,
        };
        let body = match self {
            Self::Validation { message, issues } => ErrorBody {
                error: message,
                issues,
            },
            other => ErrorBody {
                error: other.to_string(),
                issues: Vec::new(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let validation: AppError = scansync_core::Error::validation(
            "Invalid ticket event payload",
            vec![ValidationIssue::new("events[0].payload.ticketId", "is required")],
        )
        .into();
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.to_string(), "Invalid ticket event payload");

        let storage: AppError = scansync_core::Error::Transport("disk".to_string()).into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!storage.to_string().contains("disk"));
    }

    #[test]
    fn malformed_body_keeps_field_path() {
        let err = AppError::malformed(
            "Invalid request body",
            "Failed to deserialize the JSON body into the target type: events[0]: missing field `occurredAt` at line 1 column 90",
        );
        let AppError::Validation { message, issues } = &err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(message, "Invalid request body");
        assert_eq!(issues[0].path, "events[0]");
        assert!(issues[0].message.starts_with("missing field `occurredAt`"));

        let err = AppError::malformed(
            "Invalid request body",
            "Failed to parse the request body as JSON: expected value at line 1 column 1",
        );
        let AppError::Validation { issues, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(issues[0].path, "");
        assert_eq!(
            issues[0].message,
            "Failed to parse the request body as JSON: expected value at line 1 column 1"
        );
    }

    #[test]
    fn too_many_requests_sets_retry_after() {
        let response = AppError::too_many_requests("slow down", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
