use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use scansync_core::models::{Permission, Scope};
use scansync_core::protocol::{
    clamp_limit, InitialQuery, PullRequest, PushRequest, TokenResponse, INITIAL_DEFAULT_LIMIT,
    INITIAL_MAX_LIMIT, PULL_DEFAULT_LIMIT, PULL_MAX_LIMIT, SYNC_STATUS_HEADER,
};
use scansync_core::services::SyncService;
use scansync_core::util::user_fingerprint;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{
    extract_bearer_token, extract_sync_token, AuthenticatedUser, SessionVerifier, SyncTokenIssuer,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

#[derive(Clone)]
pub struct AppState {
    service: SyncService,
    session_verifier: Arc<SessionVerifier>,
    sync_tokens: Arc<SyncTokenIssuer>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: &AppConfig, service: SyncService) -> Self {
        Self {
            service,
            session_verifier: Arc::new(SessionVerifier::from_config(config)),
            sync_tokens: Arc::new(SyncTokenIssuer::from_config(config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config)),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/sync/token", post(issue_sync_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    // Layers run outermost-first: session, then sync token
    let sync_routes = Router::new()
        .route("/sync/initial", get(initial))
        .route("/sync/pull", post(pull))
        .route("/sync/push", post(push))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_sync_token,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(session_routes)
        .merge(sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.session_verifier.verify_session(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn require_sync_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Missing session"))?;
    let token = extract_sync_token(request.headers())?;
    let subject = state.sync_tokens.verify_token(token)?;
    if subject != user.user_id {
        tracing::warn!(
            user = user_fingerprint(&user.user_id),
            token_user = user_fingerprint(&subject),
            "Sync token subject does not match session"
        );
        return Err(AppError::forbidden(
            "Sync token was issued to a different user",
        ));
    }
    Ok(next.run(request).await)
}

async fn issue_sync_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TokenResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncToken, &user.user_id)
        .await?;

    let user_hash = user_fingerprint(&user.user_id);
    if !state
        .service
        .has_permission(&user.user_id, Permission::Scanning)
        .await?
    {
        tracing::warn!(user = user_hash, "Sync token refused without scanning permission");
        return Err(AppError::forbidden("Missing permission `scanning`"));
    }

    let token = state.sync_tokens.create_token(&user.user_id)?;
    tracing::info!(
        endpoint = "sync_token",
        user = user_hash,
        session = user.session_id.as_deref().unwrap_or("none"),
        expires_at = %token.expires_at,
        "Issued sync token"
    );
    Ok(Json(token))
}

async fn initial(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    query: Result<Query<InitialQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query
        .map_err(|rejection| AppError::malformed("Invalid query", &rejection.body_text()))?;
    let scope = parse_scope(query.scope.as_deref())?;
    authorize_scope(&state, &user, scope).await?;

    let limit = clamp_limit(query.limit, INITIAL_DEFAULT_LIMIT, INITIAL_MAX_LIMIT);
    let page = state
        .service
        .baseline(scope, query.cursor.as_deref(), limit)
        .await?;
    tracing::debug!(
        %scope,
        records = page.records.len(),
        has_more = page.has_more,
        server_seq = page.server_seq,
        "Served baseline page"
    );
    json_with_etag(&page, headers.get(header::IF_NONE_MATCH))
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Result<Json<PullRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body
        .map_err(|rejection| AppError::malformed("Invalid request body", &rejection.body_text()))?;
    authorize_scope(&state, &user, request.scope).await?;

    let limit = clamp_limit(request.limit, PULL_DEFAULT_LIMIT, PULL_MAX_LIMIT);
    let page = state.service.pull(&request, limit).await?;
    tracing::debug!(
        scope = %request.scope,
        after = request.last_server_seq,
        events = page.events.len(),
        server_seq = page.server_seq,
        "Served pull page"
    );
    json_with_etag(&page, None)
}

async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body
        .map_err(|rejection| AppError::malformed("Invalid request body", &rejection.body_text()))?;
    authorize_scope(&state, &user, request.scope).await?;
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncPush, &user.user_id)
        .await?;

    let outcome = state.service.push(&request).await?;
    tracing::info!(
        scope = %request.scope,
        user = user_fingerprint(&user.user_id),
        applied = outcome.events.len(),
        skipped = outcome.skipped.len(),
        "Push handled"
    );

    let status = outcome.status.as_str();
    Ok((
        [(HeaderName::from_static(SYNC_STATUS_HEADER), status)],
        Json(outcome),
    )
        .into_response())
}

fn parse_scope(raw: Option<&str>) -> Result<Scope, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing scope"))?;
    raw.parse::<Scope>().map_err(AppError::bad_request)
}

async fn authorize_scope(
    state: &AppState,
    user: &AuthenticatedUser,
    scope: Scope,
) -> Result<(), AppError> {
    if state.service.can_sync(&user.user_id, scope).await? {
        return Ok(());
    }
    tracing::warn!(
        %scope,
        user = user_fingerprint(&user.user_id),
        "Sync refused without scope permission"
    );
    Err(AppError::forbidden(format!(
        "Missing permission for scope `{scope}`"
    )))
}

/// Serialize `value` once and tag it with a content hash.
fn json_with_etag<T: Serialize>(
    value: &T,
    if_none_match: Option<&HeaderValue>,
) -> Result<Response, AppError> {
    let body = serde_json::to_vec(value)
        .map_err(|error| AppError::internal(format!("Response encoding failed: {error}")))?;
    let etag = entity_tag(&body);
    let etag_header = HeaderValue::from_str(&etag)
        .map_err(|_| AppError::internal("Entity tag is not a valid header value"))?;

    let mut response = if if_none_match.is_some_and(|value| etag_matches(value, &etag)) {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        ([(header::CONTENT_TYPE, "application/json")], body).into_response()
    };
    response.headers_mut().insert(header::ETAG, etag_header);
    Ok(response)
}

fn entity_tag(body: &[u8]) -> String {
    format!("\"{}\"", URL_SAFE_NO_PAD.encode(Sha256::digest(body)))
}

fn etag_matches(header: &HeaderValue, etag: &str) -> bool {
    header.to_str().is_ok_and(|value| {
        value.split(',').map(str::trim).any(|candidate| {
            candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
        })
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use pretty_assertions::assert_eq;
    use scansync_core::models::{InventoryItem, Record};
    use scansync_core::protocol::SYNC_TOKEN_HEADER;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::session_token_for;
    use crate::config::test_config;

    struct Harness {
        router: Router,
        service: SyncService,
        config: Arc<AppConfig>,
    }

    impl Harness {
        async fn new() -> Self {
            let config = Arc::new(test_config());
            let service = SyncService::open_in_memory().unwrap();
            for user in ["user-1", "user-2"] {
                for permission in [Permission::Scanning, Permission::Inventory, Permission::Tickets]
                {
                    service.grant_permission(user, permission).await.unwrap();
                }
            }
            let router = app_router(AppState::new(&config, service.clone()));
            Self {
                router,
                service,
                config,
            }
        }

        fn sync_token(&self, user_id: &str) -> String {
            SyncTokenIssuer::from_config(&self.config)
                .create_token(user_id)
                .unwrap()
                .token
        }

        fn request(
            &self,
            method: &str,
            uri: &str,
            session_user: &str,
            token_user: &str,
        ) -> axum::http::request::Builder {
            axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", session_token_for(&self.config, session_user)),
                )
                .header(SYNC_TOKEN_HEADER, self.sync_token(token_user))
        }

        async fn send(&self, request: Request) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn post_json(&self, uri: &str, user: &str, body: &Value) -> Response {
            let request = self
                .request("POST", uri, user, user)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(request).await
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn item(id: &str) -> Record {
        Record::Inventory(InventoryItem {
            id: id.to_string(),
            name: format!("Item {id}"),
            sku: None,
            quantity: 5,
            location: None,
            updated_at: Utc::now(),
        })
    }

    fn checkin(id: &str, ticket_id: &str) -> Value {
        json!({
            "id": id,
            "dedupeKey": format!("ticket:{ticket_id}"),
            "type": "ticket.checkin",
            "payload": {
                "ticketId": ticket_id,
                "code": format!("CODE-{ticket_id}"),
                "eventId": "EV-1",
                "status": "checked_in",
                "attemptedAt": "2026-05-01T18:30:00Z",
                "source": "gate-a"
            },
            "occurredAt": "2026-05-01T18:30:00Z"
        })
    }

    fn push_body(mutation_id: &str, events: &[Value]) -> Value {
        json!({
            "scope": "tickets",
            "clientId": "scanner-1",
            "clientMutationId": mutation_id,
            "lastKnownServerSeq": 0,
            "events": events,
        })
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let harness = Harness::new().await;
        let response = harness
            .send(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rateLimit"]["tokenAllowed"], 0);
    }

    #[tokio::test]
    async fn baseline_pages_by_cursor_and_honours_if_none_match() {
        let harness = Harness::new().await;
        harness
            .service
            .import_records(&[item("item-c"), item("item-a"), item("item-b")])
            .await
            .unwrap();

        let request = harness
            .request("GET", "/sync/initial?scope=inventory&limit=2", "user-1", "user-1")
            .body(Body::empty())
            .unwrap();
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response.headers()[header::ETAG].clone();
        let body = json_body(response).await;
        let ids: Vec<&str> = body["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|record| record["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["item-a", "item-b"]);
        assert_eq!(body["hasMore"], true);
        assert_eq!(body["nextCursor"], "item-b");
        assert_eq!(body["serverSeq"], 0);

        let request = harness
            .request("GET", "/sync/initial?scope=inventory&limit=2", "user-1", "user-1")
            .header(header::IF_NONE_MATCH, etag.clone())
            .body(Body::empty())
            .unwrap();
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::ETAG], etag);
    }

    #[tokio::test]
    async fn baseline_rejects_missing_or_unknown_scope() {
        let harness = Harness::new().await;
        for uri in ["/sync/initial", "/sync/initial?scope=parking"] {
            let request = harness
                .request("GET", uri, "user-1", "user-1")
                .body(Body::empty())
                .unwrap();
            let response = harness.send(request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn missing_sync_token_is_unauthorized() {
        let harness = Harness::new().await;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/sync/pull")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", session_token_for(&harness.config, "user-1")),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"scope": "tickets", "lastServerSeq": 0}).to_string(),
            ))
            .unwrap();
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_session_is_unauthorized() {
        let harness = Harness::new().await;
        let request = axum::http::Request::builder()
            .uri("/sync/initial?scope=tickets")
            .header(SYNC_TOKEN_HEADER, harness.sync_token("user-1"))
            .body(Body::empty())
            .unwrap();
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn pull_with_another_users_token_is_forbidden() {
        let harness = Harness::new().await;
        let request = harness
            .request("POST", "/sync/pull", "user-1", "user-2")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"scope": "tickets", "lastServerSeq": 0}).to_string(),
            ))
            .unwrap();
        let response = harness.send(request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn pull_requires_scope_permission() {
        let harness = Harness::new().await;
        harness
            .service
            .revoke_permission("user-1", Permission::Tickets)
            .await
            .unwrap();

        let response = harness
            .post_json(
                "/sync/pull",
                "user-1",
                &json!({"scope": "tickets", "lastServerSeq": 0}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn pull_rejects_negative_watermark() {
        let harness = Harness::new().await;
        let response = harness
            .post_json(
                "/sync/pull",
                "user-1",
                &json!({"scope": "tickets", "lastServerSeq": -1}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = harness
            .post_json(
                "/sync/pull",
                "user-1",
                &json!({"scope": "tickets", "lastServerSeq": "zero"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_bodies_report_field_issues() {
        let harness = Harness::new().await;
        let mut event = checkin("e-1", "T-1");
        event.as_object_mut().unwrap().remove("occurredAt");

        let response = harness
            .post_json("/sync/push", "user-1", &push_body("m-1", &[event]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid request body");
        assert_eq!(body["issues"][0]["path"], "events[0]");
        assert!(body["issues"][0]["message"]
            .as_str()
            .unwrap()
            .contains("occurredAt"));

        let response = harness
            .post_json(
                "/sync/pull",
                "user-1",
                &json!({"scope": "tickets", "lastServerSeq": "zero"}),
            )
            .await;
        let body = json_body(response).await;
        assert_eq!(body["issues"][0]["path"], "lastServerSeq");
    }

    #[tokio::test]
    async fn push_skips_persisted_dedupe_key() {
        let harness = Harness::new().await;
        let first = harness
            .post_json("/sync/push", "user-1", &push_body("m-1", &[checkin("e-1", "T-1")]))
            .await;
        assert_eq!(first.status(), StatusCode::OK);

        let response = harness
            .post_json(
                "/sync/push",
                "user-1",
                &push_body("m-2", &[checkin("e-2", "T-2"), checkin("e-3", "T-1")]),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[SYNC_STATUS_HEADER], "applied");

        let body = json_body(response).await;
        assert_eq!(body["status"], "applied");
        assert_eq!(body["events"].as_array().unwrap().len(), 1);
        assert_eq!(body["events"][0]["id"], "e-2");
        assert_eq!(body["events"][0]["serverSeq"], 2);
        assert_eq!(
            body["skipped"],
            json!([{"id": "e-3", "dedupeKey": "ticket:T-1", "reason": "duplicate-dedupe-key"}])
        );
    }

    #[tokio::test]
    async fn push_replay_returns_identical_body() {
        let harness = Harness::new().await;
        let body = push_body("m-1", &[checkin("e-1", "T-1")]);

        let first = json_body(harness.post_json("/sync/push", "user-1", &body).await).await;
        let second = json_body(harness.post_json("/sync/push", "user-1", &body).await).await;
        assert_eq!(first, second);
        assert_eq!(harness.service.server_seq(Scope::Tickets).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn push_with_invalid_payload_reports_issues() {
        let harness = Harness::new().await;
        let mut broken = checkin("e-1", "T-1");
        broken["payload"]
            .as_object_mut()
            .unwrap()
            .remove("ticketId");

        let response = harness
            .post_json("/sync/push", "user-1", &push_body("m-1", &[broken]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid ticket event payload");
        assert_eq!(body["issues"][0]["path"], "events[0].payload.ticketId");
        assert_eq!(harness.service.server_seq(Scope::Tickets).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn token_endpoint_requires_scanning() {
        let harness = Harness::new().await;
        let request = |user: &str| {
            axum::http::Request::builder()
                .method("POST")
                .uri("/sync/token")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", session_token_for(&harness.config, user)),
                )
                .body(Body::empty())
                .unwrap()
        };

        let response = harness.send(request("user-1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: TokenResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(
            SyncTokenIssuer::from_config(&harness.config)
                .verify_token(&body.token)
                .unwrap(),
            "user-1"
        );

        let response = harness.send(request("stranger")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
