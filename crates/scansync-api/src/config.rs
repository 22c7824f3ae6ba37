use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub seed_path: Option<PathBuf>,
    pub session_jwt_secret: String,
    pub session_jwt_issuer: String,
    pub sync_token_secret: String,
    pub sync_token_ttl: Duration,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_token_rate_limit_per_window: u32,
    pub sync_push_rate_limit_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("seed_path", &self.seed_path)
            .field("session_jwt_secret", &"[REDACTED]")
            .field("session_jwt_issuer", &self.session_jwt_issuer)
            .field("sync_token_secret", &"[REDACTED]")
            .field("sync_token_ttl", &self.sync_token_ttl)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_token_rate_limit_per_window",
                &self.sync_token_rate_limit_per_window,
            )
            .field(
                "sync_push_rate_limit_per_window",
                &self.sync_push_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SCANSYNC_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "SCANSYNC_DATABASE_PATH",
            "scansync.db",
        ));
        let seed_path = optional_trimmed(&lookup, "SCANSYNC_SEED_PATH").map(PathBuf::from);

        let session_jwt_secret = required_trimmed(&lookup, "SESSION_JWT_SECRET")?;
        let sync_token_secret = required_trimmed(&lookup, "SYNC_TOKEN_SECRET")?;
        if session_jwt_secret == sync_token_secret {
            return Err(ConfigError::Invalid(
                "SYNC_TOKEN_SECRET must differ from SESSION_JWT_SECRET".to_string(),
            ));
        }
        let session_jwt_issuer = value_or_default(&lookup, "SESSION_JWT_ISSUER", "scansync-portal");

        let sync_token_ttl_secs =
            bounded_u64(&lookup, "SYNC_TOKEN_TTL_SECS", "900", 60..=3_600)?;
        let auth_clock_skew_secs = bounded_u64(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0..=300)?;
        let rate_limit_window_secs =
            bounded_u64(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10..=3_600)?;

        let sync_token_rate_limit_per_window =
            value_or_default(&lookup, "SYNC_TOKEN_RATE_LIMIT_PER_WINDOW", "20")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_TOKEN_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]"
                            .to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&sync_token_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SYNC_TOKEN_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let sync_push_rate_limit_per_window =
            value_or_default(&lookup, "SYNC_PUSH_RATE_LIMIT_PER_WINDOW", "600")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_PUSH_RATE_LIMIT_PER_WINDOW must be an integer in [1, 10000]"
                            .to_string(),
                    )
                })?;
        if !(1..=10_000).contains(&sync_push_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SYNC_PUSH_RATE_LIMIT_PER_WINDOW must be in [1, 10000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            seed_path,
            session_jwt_secret,
            session_jwt_issuer,
            sync_token_secret,
            sync_token_ttl: Duration::from_secs(sync_token_ttl_secs),
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_token_rate_limit_per_window,
            sync_push_rate_limit_per_window,
        })
    }
}

fn bounded_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        database_path: PathBuf::from(":memory:"),
        seed_path: None,
        session_jwt_secret: "session-secret-for-tests".to_string(),
        session_jwt_issuer: "scansync-portal".to_string(),
        sync_token_secret: "sync-secret-for-tests".to_string(),
        sync_token_ttl: Duration::from_secs(900),
        auth_clock_skew: Duration::from_secs(60),
        rate_limit_window: Duration::from_secs(60),
        sync_token_rate_limit_per_window: 20,
        sync_push_rate_limit_per_window: 600,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_minimum_secrets() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = lookup(&map).unwrap_err();
        assert!(err.to_string().contains("SESSION_JWT_SECRET"));

        let map = HashMap::from([("SESSION_JWT_SECRET", "session")]);
        let err = lookup(&map).unwrap_err();
        assert!(err.to_string().contains("SYNC_TOKEN_SECRET"));
    }

    #[test]
    fn config_applies_defaults() {
        let map = HashMap::from([
            ("SESSION_JWT_SECRET", "session"),
            ("SYNC_TOKEN_SECRET", "sync"),
        ]);
        let config = lookup(&map).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.sync_token_ttl, Duration::from_secs(900));
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
        assert_eq!(config.sync_token_rate_limit_per_window, 20);
        assert!(config.seed_path.is_none());
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let map = HashMap::from([
            ("SESSION_JWT_SECRET", "session"),
            ("SYNC_TOKEN_SECRET", "sync"),
            ("SYNC_TOKEN_TTL_SECS", "30"),
        ]);
        let err = lookup(&map).unwrap_err();
        assert!(err.to_string().contains("SYNC_TOKEN_TTL_SECS"));

        let map = HashMap::from([
            ("SESSION_JWT_SECRET", "session"),
            ("SYNC_TOKEN_SECRET", "sync"),
            ("AUTH_CLOCK_SKEW_SECS", "soon"),
        ]);
        let err = lookup(&map).unwrap_err();
        assert!(err.to_string().contains("AUTH_CLOCK_SKEW_SECS"));
    }

    #[test]
    fn config_rejects_shared_secret() {
        let map = HashMap::from([
            ("SESSION_JWT_SECRET", "same"),
            ("SYNC_TOKEN_SECRET", "same"),
        ]);
        assert!(lookup(&map).is_err());
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let map = HashMap::from([
            ("SESSION_JWT_SECRET", "sensitive-session-secret"),
            ("SYNC_TOKEN_SECRET", "sensitive-sync-secret"),
        ]);
        let config = lookup(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-session-secret"));
        assert!(!debug_output.contains("sensitive-sync-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
