//! Environment-based configuration types for the identity provider runtime.

use anyhow::Result;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::oauth::types::parse_scope;

/// HTTP server port configuration
#[derive(Clone)]
pub struct HttpPort(u16);

/// Boolean switch parsed from true/false/1/0/yes/no/on/off
#[derive(Clone, Copy)]
pub struct Toggle(bool);

/// Positive lifetime of an issued credential
#[derive(Clone, Copy, Debug)]
pub struct Lifetime(chrono::Duration);

/// Interval between runs of a background task
#[derive(Clone, Copy)]
pub struct TaskInterval(Duration);

/// Scope given to accounts that never had one recorded
#[derive(Clone, Default)]
pub struct DefaultScope(Vec<String>);

/// Lifetimes of access tokens, refresh tokens, and authorization codes
#[derive(Clone, Copy, Debug)]
pub struct TokenLifetimes {
    pub access_token: chrono::Duration,
    pub refresh_token: chrono::Duration,
    pub authorization_code: chrono::Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_token: chrono::Duration::hours(1),
            refresh_token: chrono::Duration::days(14),
            authorization_code: chrono::Duration::minutes(5),
        }
    }
}

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// `privilege.can-use-cache`
    pub can_use_cache: Toggle,
    /// `oauth.access-token-lifetime`
    pub access_token_lifetime: Lifetime,
    /// `oauth.refresh-token-lifetime`
    pub refresh_token_lifetime: Lifetime,
    /// `oauth.authorization-code-lifetime`
    pub authorization_code_lifetime: Lifetime,
    /// `user.account-creation.default-scope`
    pub default_scope: DefaultScope,
    pub role_cache_refresh_interval: TaskInterval,
    pub cleanup_interval: TaskInterval,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let storage_backend = default_env("STORAGE_BACKEND", "memory");
        let database_url = optional_env("DATABASE_URL");
        if storage_backend == "postgres" && database_url.is_none() {
            return Err(ConfigError::EnvVarRequired("DATABASE_URL".to_string()).into());
        }
        let redis_url = optional_env("REDIS_URL");
        let can_use_cache: Toggle = default_env("PRIVILEGE_CAN_USE_CACHE", "false").try_into()?;
        let access_token_lifetime: Lifetime =
            default_env("OAUTH_ACCESS_TOKEN_LIFETIME", "1h").try_into()?;
        let refresh_token_lifetime: Lifetime =
            default_env("OAUTH_REFRESH_TOKEN_LIFETIME", "14d").try_into()?;
        let authorization_code_lifetime: Lifetime =
            default_env("OAUTH_AUTHORIZATION_CODE_LIFETIME", "5m").try_into()?;
        let default_scope: DefaultScope = default_env(
            "USER_ACCOUNT_CREATION_DEFAULT_SCOPE",
            "delegated:profile:read delegated:profile:write",
        )
        .into();
        let role_cache_refresh_interval: TaskInterval =
            default_env("ROLE_CACHE_REFRESH_INTERVAL", "5m").try_into()?;
        let cleanup_interval: TaskInterval =
            default_env("CLEANUP_INTERVAL", "10m").try_into()?;

        Ok(Self {
            version: version()?,
            http_port,
            storage_backend,
            database_url,
            redis_url,
            can_use_cache,
            access_token_lifetime,
            refresh_token_lifetime,
            authorization_code_lifetime,
            default_scope,
            role_cache_refresh_interval,
            cleanup_interval,
        })
    }

    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            access_token: *self.access_token_lifetime.as_ref(),
            refresh_token: *self.refresh_token_lifetime.as_ref(),
            authorization_code: *self.authorization_code_lifetime.as_ref(),
        }
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for Toggle {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl AsRef<bool> for Toggle {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl TryFrom<String> for Lifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
        if duration.is_zero() {
            return Err(ConfigError::InvalidLifetime(value).into());
        }
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for Lifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for TaskInterval {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
        if duration.is_zero() {
            return Err(ConfigError::InvalidLifetime(value).into());
        }
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for TaskInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl From<String> for DefaultScope {
    fn from(value: String) -> Self {
        Self(parse_scope(&value))
    }
}

impl AsRef<Vec<String>> for DefaultScope {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetime_parsing() {
        let lifetime: Lifetime = "3600".to_string().try_into().unwrap();
        assert_eq!(lifetime.as_ref().num_seconds(), 3600);

        let lifetime: Lifetime = "14d".to_string().try_into().unwrap();
        assert_eq!(lifetime.as_ref().num_days(), 14);

        let zero = Lifetime::try_from("0".to_string());
        assert!(zero.is_err(), "zero lifetime should be rejected");

        let garbage = Lifetime::try_from("soon".to_string());
        assert!(garbage.is_err());
        if let Err(e) = garbage {
            assert!(e.to_string().contains("error-idp-config-4"));
        }
    }

    #[test]
    fn test_toggle_parsing() {
        for value in ["true", "1", "YES", "on"] {
            let toggle: Toggle = value.to_string().try_into().unwrap();
            assert!(*toggle.as_ref(), "{value} should parse as true");
        }
        for value in ["false", "0", "no", "Off"] {
            let toggle: Toggle = value.to_string().try_into().unwrap();
            assert!(!*toggle.as_ref(), "{value} should parse as false");
        }
        assert!(Toggle::try_from("maybe".to_string()).is_err());
    }

    #[test]
    fn test_default_scope_parsing() {
        let scope: DefaultScope = "delegated:profile:read  delegated:profile:read posts:read"
            .to_string()
            .into();
        assert_eq!(
            scope.as_ref(),
            &vec![
                "delegated:profile:read".to_string(),
                "posts:read".to_string()
            ]
        );
    }

    #[test]
    fn test_http_port_parsing() {
        let port: HttpPort = "3000".to_string().try_into().unwrap();
        assert_eq!(*port.as_ref(), 3000);
        assert!(HttpPort::try_from("http".to_string()).is_err());
    }
}
