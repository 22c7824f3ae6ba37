use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use scansync_core::protocol::{TokenResponse, SYNC_TOKEN_HEADER};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

/// Audience claim carried by every sync token
pub const SYNC_TOKEN_AUDIENCE: &str = "scan-sync";

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub session_id: Option<String>,
}

/// Verifies portal session JWTs (HS256, shared secret).
#[derive(Clone)]
pub struct SessionVerifier {
    key: DecodingKey,
    issuer: String,
    clock_skew: Duration,
}

impl SessionVerifier {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            key: DecodingKey::from_secret(config.session_jwt_secret.as_bytes()),
            issuer: config.session_jwt_issuer.clone(),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_session(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();
        validation.set_issuer(&[self.issuer.as_str()]);

        let decoded = decode::<SessionClaims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Session validation failed: {}", sanitize(&error)))
        })?;

        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Session subject is missing"));
        }
        validate_temporal_claims(&decoded.claims, self.clock_skew)?;

        Ok(AuthenticatedUser {
            user_id: decoded.claims.sub,
            session_id: decoded.claims.session_id.or(decoded.claims.jti),
        })
    }
}

/// Issues and verifies short-lived sync tokens bound to one user.
#[derive(Clone)]
pub struct SyncTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    clock_skew: Duration,
}

impl SyncTokenIssuer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.sync_token_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.sync_token_secret.as_bytes()),
            ttl: config.sync_token_ttl,
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn create_token(&self, user_id: &str) -> Result<TokenResponse, AppError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|_| AppError::internal("sync token TTL out of range"))?;
        let expires_at = now + ttl;
        let claims = SyncTokenClaims {
            sub: user_id.to_string(),
            aud: SYNC_TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::now_v7().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|error| AppError::internal(format!("Token signing failed: {}", sanitize(&error))))?;

        Ok(TokenResponse { token, expires_at })
    }

    /// Returns the user the token was issued to.
    pub fn verify_token(&self, token: &str) -> Result<String, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.clock_skew.as_secs();
        validation.set_audience(&[SYNC_TOKEN_AUDIENCE]);

        let decoded =
            decode::<SyncTokenClaims>(token, &self.decoding_key, &validation).map_err(|error| {
                AppError::unauthorized(format!("Sync token validation failed: {}", sanitize(&error)))
            })?;
        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Sync token subject is missing"));
        }
        Ok(decoded.claims.sub)
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

pub fn extract_sync_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let token = headers
        .get(SYNC_TOKEN_HEADER)
        .ok_or_else(|| AppError::unauthorized("Missing X-Sync-Token header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("X-Sync-Token header is not valid UTF-8"))?
        .trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("X-Sync-Token header is empty"));
    }
    Ok(token)
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SyncTokenClaims {
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
}

fn validate_temporal_claims(claims: &SessionClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Session missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Session is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Session missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Session `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Session is not yet valid"));
        }
    }

    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

/// Signs a portal session the way the portal would.
#[cfg(test)]
pub(crate) fn session_token_for(config: &AppConfig, user_id: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        iss: Some(config.session_jwt_issuer.clone()),
        exp: Some(now + 600),
        iat: Some(now),
        nbf: None,
        jti: Some(format!("session-{user_id}")),
        session_id: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.session_jwt_secret.as_bytes()),
    )
    .unwrap()
}
