//! Wire types shared by the sync API and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result, ValidationIssue};
use crate::models::{CandidateEvent, PushOutcome, Record, Scope, SyncEvent};

/// Header carrying the short-lived sync token
pub const SYNC_TOKEN_HEADER: &str = "x-sync-token";
/// Header echoing the push status
pub const SYNC_STATUS_HEADER: &str = "x-sync-status";

pub const INITIAL_DEFAULT_LIMIT: usize = 50;
pub const INITIAL_MAX_LIMIT: usize = 100;
pub const PULL_DEFAULT_LIMIT: usize = 100;
pub const PULL_MAX_LIMIT: usize = 500;

/// Bound a requested page size to `1..=max`, using `default` when absent.
pub fn clamp_limit(requested: Option<i64>, default: usize, max: usize) -> usize {
    requested.map_or(default, |limit| {
        usize::try_from(limit.max(1)).map_or(max, |limit| limit.min(max))
    })
}

/// Query string of `GET /sync/initial`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialResponse {
    pub scope: Scope,
    pub records: Vec<Record>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    /// Log high-water mark when the page was read
    pub server_seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub scope: Scope,
    pub last_server_seq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl PullRequest {
    pub fn validate(&self) -> Result<()> {
        if self.last_server_seq < 0 {
            return Err(Error::validation(
                "Invalid pull request",
                vec![ValidationIssue::new("lastServerSeq", "must not be negative")],
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub scope: Scope,
    pub events: Vec<SyncEvent>,
    pub server_seq: i64,
    pub has_more: bool,
    /// `serverSeq` of the last returned event
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub scope: Scope,
    pub client_id: String,
    pub client_mutation_id: String,
    pub last_known_server_seq: i64,
    #[serde(default)]
    pub events: Vec<CandidateEvent>,
}

impl PushRequest {
    /// Structural checks that do not need the store.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        if self.client_id.trim().is_empty() {
            issues.push(ValidationIssue::new("clientId", "must not be empty"));
        }
        if self.client_mutation_id.trim().is_empty() {
            issues.push(ValidationIssue::new("clientMutationId", "must not be empty"));
        }
        if self.last_known_server_seq < 0 {
            issues.push(ValidationIssue::new(
                "lastKnownServerSeq",
                "must not be negative",
            ));
        }

        let mut seen = HashSet::new();
        for (index, event) in self.events.iter().enumerate() {
            if event.id.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("events[{index}].id"),
                    "must not be empty",
                ));
            } else if !seen.insert(event.id.as_str()) {
                issues.push(ValidationIssue::new(
                    format!("events[{index}].id"),
                    format!("duplicate event id `{}` in batch", event.id),
                ));
            }
            if event
                .dedupe_key
                .as_deref()
                .is_some_and(|key| key.trim().is_empty())
            {
                issues.push(ValidationIssue::new(
                    format!("events[{index}].dedupeKey"),
                    "must not be empty when present",
                ));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::validation("Invalid push request", issues))
        }
    }
}

/// Body of a successful push; identical on replay
pub type PushResponse = PushOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Error body returned by every endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ValidationIssue>,
}
