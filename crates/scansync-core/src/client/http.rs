//! `reqwest` transport for the sync endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::SyncTransport;
use crate::error::{Error, Result};
use crate::models::Scope;
use crate::protocol::{
    ErrorBody, InitialQuery, InitialResponse, PullRequest, PullResponse, PushRequest,
    PushResponse, TokenResponse, SYNC_TOKEN_HEADER,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Refresh the sync token this long before it expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;

/// Talks to a scansync API server.
///
/// Holds the portal session token and exchanges it for short-lived sync
/// tokens on demand, refreshing once when the server answers 401.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    session_token: String,
    client: reqwest::Client,
    sync_token: Arc<Mutex<Option<TokenResponse>>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("session_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, session_token: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let session_token = normalize_text_option(Some(session_token.into()))
            .ok_or_else(|| Error::InvalidInput("session token must not be empty".to_string()))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Transport(error.to_string()))?;

        Ok(Self {
            base_url,
            session_token,
            client,
            sync_token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange the session token for a sync token (`POST /sync/token`).
    pub async fn request_token(&self) -> Result<TokenResponse> {
        let response = self
            .client
            .post(format!("{}/sync/token", self.base_url))
            .bearer_auth(&self.session_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn sync_token(&self, force_refresh: bool) -> Result<String> {
        let mut cached = self.sync_token.lock().await;
        let fresh = cached.as_ref().filter(|token| {
            !force_refresh
                && token.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now()
        });
        if let Some(token) = fresh {
            return Ok(token.token.clone());
        }

        let token = self.request_token().await?;
        tracing::debug!(expires_at = %token.expires_at, "Obtained sync token");
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn call<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut refreshed = false;
        loop {
            let token = self.sync_token(refreshed).await?;
            let response = build(&self.client, &self.base_url)
                .header(SYNC_TOKEN_HEADER, token)
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(transport_error)?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                refreshed = true;
                continue;
            }
            return decode(response).await;
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_initial(
        &self,
        scope: Scope,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<InitialResponse> {
        let query = InitialQuery {
            scope: Some(scope.to_string()),
            cursor: cursor.map(str::to_string),
            limit,
        };
        self.call(|client, base_url| {
            client
                .get(format!("{base_url}/sync/initial"))
                .query(&query)
        })
        .await
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        self.call(|client, base_url| client.post(format!("{base_url}/sync/pull")).json(request))
            .await
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        self.call(|client, base_url| client.post(format!("{base_url}/sync/push")).json(request))
            .await
    }
}

#[allow(clippy::needless_pass_by_value)]
fn transport_error(error: reqwest::Error) -> Error {
    Error::Transport(error.to_string())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(transport_error);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body))
}

/// Map a non-success response to the error the runner acts on.
fn api_error(status: StatusCode, body: &str) -> Error {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = parsed.as_ref().map_or_else(
        || {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        },
        |body| body.error.clone(),
    );

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Error::Transport(format!("{message} ({})", status.as_u16()));
    }
    match parsed {
        Some(body) if status == StatusCode::BAD_REQUEST => Error::validation(body.error, body.issues),
        _ => Error::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("API URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn transport_debug_redacts_session() {
        let transport = HttpTransport::new("http://localhost:8080", "secret-session").unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret-session"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn api_error_classifies_statuses() {
        let body = r#"{"error":"Invalid ticket event payload","issues":[{"path":"events[0].payload.ticketId","message":"is required"}]}"#;
        let Error::Validation { message, issues } = api_error(StatusCode::BAD_REQUEST, body) else {
            panic!("expected validation error");
        };
        assert_eq!(message, "Invalid ticket event payload");
        assert_eq!(issues.len(), 1);

        assert!(api_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(api_error(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"slow down"}"#).is_retryable());

        let forbidden = api_error(StatusCode::FORBIDDEN, r#"{"error":"Forbidden"}"#);
        assert!(matches!(forbidden, Error::Rejected { status: 403, .. }));
        assert!(!forbidden.is_retryable());
    }
}
