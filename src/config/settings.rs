//! Runtime settings read from environment variables (a `.env` file is loaded by the binaries).

use crate::error::ConfigError;
use crate::service::RetryPolicy;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_RESOURCE_SCHEMA: &str = "RESOURCE_SCHEMA";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_WEBDAV_CONTEXT: &str = "WEBDAV_CONTEXT";
pub const ENV_TX_MAX_RETRIES: &str = "TX_MAX_RETRIES";
pub const ENV_TX_MIN_BACKOFF_MS: &str = "TX_MIN_BACKOFF_MS";
pub const ENV_TX_MAX_BACKOFF_MS: &str = "TX_MAX_BACKOFF_MS";
pub const ENV_UPSTREAM_CACHE_TTL_SECS: &str = "UPSTREAM_CACHE_TTL_SECS";

pub const DEFAULT_SCHEMA: &str = "repository";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_WEBDAV_CONTEXT: &str = "/webdav";
pub const DEFAULT_UPSTREAM_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// PostgreSQL URL; `None` selects the in-memory repository.
    pub database_url: Option<String>,
    /// Schema holding the repository tables. Must be a valid PostgreSQL identifier.
    pub schema: String,
    pub bind_addr: SocketAddr,
    pub webdav_context: String,
    pub retry: RetryPolicy,
    pub upstream_cache_ttl: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = RetryPolicy::default();

        let schema = get(ENV_RESOURCE_SCHEMA).unwrap_or_else(|| DEFAULT_SCHEMA.into());
        if !schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(ENV_RESOURCE_SCHEMA, "only letters, digits and underscores are allowed"));
        }

        let mut webdav_context = get(ENV_WEBDAV_CONTEXT).unwrap_or_else(|| DEFAULT_WEBDAV_CONTEXT.into());
        if !webdav_context.starts_with('/') {
            webdav_context.insert(0, '/');
        }
        while webdav_context.len() > 1 && webdav_context.ends_with('/') {
            webdav_context.pop();
        }

        let retry = RetryPolicy {
            max_retries: parse(get(ENV_TX_MAX_RETRIES), ENV_TX_MAX_RETRIES, defaults.max_retries)?,
            min_backoff: Duration::from_millis(parse(
                get(ENV_TX_MIN_BACKOFF_MS),
                ENV_TX_MIN_BACKOFF_MS,
                defaults.min_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse(
                get(ENV_TX_MAX_BACKOFF_MS),
                ENV_TX_MAX_BACKOFF_MS,
                defaults.max_backoff.as_millis() as u64,
            )?),
        };
        if retry.max_backoff < retry.min_backoff {
            return Err(invalid(ENV_TX_MAX_BACKOFF_MS, "must not be below TX_MIN_BACKOFF_MS"));
        }

        Ok(Settings {
            database_url: get(ENV_DATABASE_URL),
            schema,
            bind_addr: parse(
                get(ENV_BIND_ADDR),
                ENV_BIND_ADDR,
                SocketAddr::from(([127, 0, 0, 1], 3000)),
            )?,
            webdav_context,
            retry,
            upstream_cache_ttl: Duration::from_secs(parse(
                get(ENV_UPSTREAM_CACHE_TTL_SECS),
                ENV_UPSTREAM_CACHE_TTL_SECS,
                DEFAULT_UPSTREAM_CACHE_TTL.as_secs(),
            )?),
        })
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse::<T>().map_err(|e| invalid(key, format!("{:?}: {}", value, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.database_url, None);
        assert_eq!(s.schema, DEFAULT_SCHEMA);
        assert_eq!(s.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(s.webdav_context, DEFAULT_WEBDAV_CONTEXT);
        assert_eq!(s.retry, RetryPolicy::default());
        assert_eq!(s.upstream_cache_ttl, DEFAULT_UPSTREAM_CACHE_TTL);
    }

    #[test]
    fn values_are_read_and_normalized() {
        let s = settings(&[
            (ENV_DATABASE_URL, "postgres://localhost/content"),
            (ENV_WEBDAV_CONTEXT, "dav/"),
            (ENV_TX_MAX_RETRIES, "3"),
            (ENV_TX_MIN_BACKOFF_MS, "10"),
            (ENV_TX_MAX_BACKOFF_MS, "50"),
            (ENV_UPSTREAM_CACHE_TTL_SECS, "30"),
            (ENV_BIND_ADDR, "0.0.0.0:8080"),
        ])
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/content"));
        assert_eq!(s.webdav_context, "/dav");
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.retry.max_backoff, Duration::from_millis(50));
        assert_eq!(s.upstream_cache_ttl, Duration::from_secs(30));
        assert_eq!(s.bind_addr.port(), 8080);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            settings(&[(ENV_TX_MAX_RETRIES, "many")]),
            Err(ConfigError::InvalidSetting { .. })
        ));
        assert!(settings(&[(ENV_RESOURCE_SCHEMA, "drop table")]).is_err());
        assert!(settings(&[(ENV_TX_MIN_BACKOFF_MS, "500"), (ENV_TX_MAX_BACKOFF_MS, "100")]).is_err());
        assert!(settings(&[(ENV_BIND_ADDR, "nowhere")]).is_err());
    }
}
