//! Environment-based configuration types for the identity provider core.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::errors::ConfigError;
use crate::oauth::token_issuer::{MIN_SECRET_LEN, TokenIssuer};
use crate::storage::{StorageBackend, parse_storage_backend};

/// HMAC key used to sign access and refresh tokens
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

/// Access token lifetime
#[derive(Clone, Debug)]
pub struct AccessTokenExpiration(chrono::Duration);

/// Refresh token lifetime
#[derive(Clone, Debug)]
pub struct RefreshTokenExpiration(chrono::Duration);

/// Per-call deadline for the key-value store
#[derive(Clone, Debug)]
pub struct StorageTimeout(Duration);

/// Main application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub signing_secret: SigningSecret,
    pub token_issuer: String,
    pub access_token_expiration: AccessTokenExpiration,
    pub refresh_token_expiration: RefreshTokenExpiration,
    pub storage_backend: StorageBackend,
    pub storage_timeout: StorageTimeout,
    pub clients_file: Option<String>,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let signing_secret: SigningSecret = require_env("TOKEN_SIGNING_SECRET")?.try_into()?;
        let token_issuer = default_env("TOKEN_ISSUER", "idp-core");
        let access_token_expiration: AccessTokenExpiration =
            default_env("ACCESS_TOKEN_EXPIRATION", "15m").try_into()?;
        let refresh_token_expiration: RefreshTokenExpiration =
            default_env("REFRESH_TOKEN_EXPIRATION", "7d").try_into()?;
        check_lifetime_order(&access_token_expiration, &refresh_token_expiration)?;

        let redis_url = optional_env("REDIS_URL");
        let storage_backend = parse_storage_backend(
            &default_env("STORAGE_BACKEND", "memory"),
            redis_url.as_deref(),
        )?;
        let storage_timeout: StorageTimeout = default_env("STORAGE_TIMEOUT", "2s").try_into()?;
        let clients_file = optional_env("CLIENTS_FILE");

        Ok(Self {
            version: version()?,
            signing_secret,
            token_issuer,
            access_token_expiration,
            refresh_token_expiration,
            storage_backend,
            storage_timeout,
            clients_file,
        })
    }

    /// Construct the token issuer described by this configuration
    pub fn build_token_issuer(&self, clock: Arc<dyn Clock>) -> Result<TokenIssuer> {
        Ok(TokenIssuer::new(
            self.token_issuer.clone(),
            self.signing_secret.as_ref(),
            *self.access_token_expiration.as_ref(),
            *self.refresh_token_expiration.as_ref(),
            clock,
        )?)
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn check_lifetime_order(
    access: &AccessTokenExpiration,
    refresh: &RefreshTokenExpiration,
) -> Result<(), ConfigError> {
    if access.0 > refresh.0 {
        return Err(ConfigError::TokenLifetimeOrder(
            access.0.num_seconds(),
            refresh.0.num_seconds(),
        ));
    }
    Ok(())
}

fn parse_lifetime(value: String) -> Result<chrono::Duration, ConfigError> {
    let duration = duration_str::parse(&value)
        .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
    if duration.is_zero() {
        return Err(ConfigError::NonPositiveLifetime(value));
    }
    chrono::Duration::from_std(duration)
        .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))
}

impl TryFrom<String> for SigningSecret {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SigningSecretTooShort(MIN_SECRET_LEN));
        }
        Ok(Self(value.into_bytes()))
    }
}

impl AsRef<[u8]> for SigningSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(..)")
    }
}

impl TryFrom<String> for AccessTokenExpiration {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(parse_lifetime(value)?))
    }
}

impl AsRef<chrono::Duration> for AccessTokenExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for RefreshTokenExpiration {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self(parse_lifetime(value)?))
    }
}

impl AsRef<chrono::Duration> for RefreshTokenExpiration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for StorageTimeout {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for StorageTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}
