//! Error types for scansync-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Scope;

/// Result type alias using scansync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// A single problem found while validating a request or event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path to the offending field, e.g. `events[1].payload.ticketId`
    pub path: String,
    /// Human readable description
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Re-root the issue path under `prefix`.
    #[must_use]
    pub fn nested(self, prefix: &str) -> Self {
        let path = if self.path.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}.{}", self.path)
        };
        Self { path, ..self }
    }
}

/// Errors that can occur in scansync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request or payload failed validation; the whole batch is rejected
    #[error("{message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    /// Record or row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Deltas arrived with a serverSeq that does not advance the watermark
    #[error("Out-of-order delta for {scope}: serverSeq {received} after {previous}")]
    OutOfOrder {
        scope: Scope,
        previous: i64,
        received: i64,
    },

    /// Scope has no baseline yet
    #[error("Scope {0} has not been initialized from a baseline")]
    NotInitialized(Scope),

    /// Remote sync endpoint failed
    #[error("Sync transport error: {0}")]
    Transport(String),

    /// Server refused the request (auth, permission, or other 4xx)
    #[error("Sync request rejected: {message} ({status})")]
    Rejected { status: u16, message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self::Validation {
            message: message.into(),
            issues,
        }
    }

    /// Errors a sync loop may retry after backing off.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_issue_prefixes_path() {
        let issue = ValidationIssue::new("ticketId", "is required").nested("events[0].payload");
        assert_eq!(issue.path, "events[0].payload.ticketId");

        let root = ValidationIssue::new("", "must be an object").nested("events[2].payload");
        assert_eq!(root.path, "events[2].payload");
    }

    #[test]
    fn validation_error_displays_message_only() {
        let err = Error::validation(
            "Invalid ticket event payload",
            vec![ValidationIssue::new("ticketId", "is required")],
        );
        assert_eq!(err.to_string(), "Invalid ticket event payload");
        assert!(!err.is_retryable());
        assert!(Error::Transport("offline".into()).is_retryable());
    }
}
