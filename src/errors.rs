//! Standardized error types following the `error-idp-<domain>-<number>` format.

use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-idp-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when version information is not available
    #[error("error-idp-config-2 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-idp-config-3 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when the signing secret is too weak to be used
    #[error("error-idp-config-4 TOKEN_SIGNING_SECRET must be at least {0} bytes")]
    SigningSecretTooShort(usize),

    /// Error when access tokens would outlive refresh tokens
    #[error(
        "error-idp-config-5 ACCESS_TOKEN_EXPIRATION ({0}s) must not exceed REFRESH_TOKEN_EXPIRATION ({1}s)"
    )]
    TokenLifetimeOrder(i64, i64),

    /// Error when a token lifetime is zero or negative
    #[error("error-idp-config-6 Token lifetime must be positive: {0}")]
    NonPositiveLifetime(String),

    /// Error when the storage backend name or its settings are unusable
    #[error("error-idp-config-7 Invalid storage backend: {0}")]
    InvalidStorageBackend(String),

    /// Error when the clients file cannot be loaded
    #[error("error-idp-config-8 Failed to load clients file '{0}': {1}")]
    ClientsFileFailed(String, String),
}

/// Key-value store errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when the store connection cannot be established
    #[error("error-idp-storage-1 Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when a store command fails
    #[error("error-idp-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when a stored record cannot be (de)serialized
    #[error("error-idp-storage-3 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when a store call exceeds its deadline
    #[error("error-idp-storage-4 Store call timed out after {0}ms")]
    Timeout(u128),

    /// Error when the store is known to be unreachable
    #[error("error-idp-storage-5 Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether the failure means the store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

/// Token signing and verification errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token is past its absolute expiry
    #[error("error-idp-token-1 Token expired")]
    Expired,

    /// The token is malformed or its signature does not verify
    #[error("error-idp-token-2 Invalid token: {0}")]
    Invalid(String),

    /// The token is genuine but was minted for another purpose
    #[error("error-idp-token-3 Wrong token type: expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    /// Signing failed
    #[error("error-idp-token-4 Token signing failed: {0}")]
    SigningFailed(String),

    /// The issuer was constructed with unusable settings
    #[error("error-idp-token-5 Invalid token issuer configuration: {0}")]
    InvalidConfiguration(String),
}

/// Authorization code exchange errors.
///
/// Every variant other than `Storage` is produced after the code has
/// already been removed from the store.
#[derive(Debug, Error)]
pub enum CodeError {
    /// The code was never issued or its TTL elapsed
    #[error("error-idp-code-1 Authorization code not found")]
    NotFound,

    /// The code was exchanged before
    #[error("error-idp-code-2 Authorization code already consumed")]
    AlreadyConsumed,

    /// The code record outlived its expiry in the backing store
    #[error("error-idp-code-3 Authorization code expired")]
    Expired,

    /// The exchanging client is not the one the code was issued to
    #[error("error-idp-code-4 Authorization code was issued to another client")]
    ClientMismatch,

    /// The redirect URI differs from the one used at issuance
    #[error("error-idp-code-5 Redirect URI does not match authorization request")]
    RedirectMismatch,

    /// The store could not complete the operation
    #[error("error-idp-code-6 {0}")]
    Storage(#[from] StorageError),
}

/// OAuth grant errors returned by the flow coordinator
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Malformed or incomplete request
    #[error("error-idp-oauth-1 Invalid request: {0}")]
    Validation(String),

    /// Client authentication failed or the client is inactive
    #[error("error-idp-oauth-2 Client authentication failed: {0}")]
    Unauthorized(String),

    /// The client is not registered for the requested grant type
    #[error("error-idp-oauth-3 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// No client is registered under the identifier
    #[error("error-idp-oauth-4 Client not found: {0}")]
    ClientNotFound(String),

    /// The authorization code is unknown or its TTL elapsed
    #[error("error-idp-oauth-5 Authorization code not found")]
    CodeNotFound,

    /// The authorization code was exchanged before
    #[error("error-idp-oauth-6 Conflict: {0}")]
    Conflict(String),

    /// A code or token is past its expiry
    #[error("error-idp-oauth-7 Expired: {0}")]
    Expired(String),

    /// The code was issued to a different client
    #[error("error-idp-oauth-8 Client mismatch: {0}")]
    ClientMismatch(String),

    /// The redirect URI differs from the one bound to the code
    #[error("error-idp-oauth-9 Redirect URI mismatch")]
    RedirectMismatch,

    /// The presented token is malformed, of the wrong type or revoked
    #[error("error-idp-oauth-10 Invalid token: {0}")]
    InvalidToken(String),

    /// Requested scope exceeds what the client or grant allows
    #[error("error-idp-oauth-11 Invalid scope: {0}")]
    InvalidScope(String),

    /// A backing store could not be reached; safe to retry
    #[error("error-idp-oauth-12 Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Unexpected internal failure
    #[error("error-idp-oauth-13 Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// OAuth 2.x `error` code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::Unauthorized(_) | Self::ClientNotFound(_) => "invalid_client",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::CodeNotFound
            | Self::Conflict(_)
            | Self::Expired(_)
            | Self::ClientMismatch(_)
            | Self::RedirectMismatch
            | Self::InvalidToken(_) => "invalid_grant",
            Self::InvalidScope(_) => "invalid_scope",
            Self::ServiceUnavailable(_) => "temporarily_unavailable",
            Self::ServerError(_) => "server_error",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// For an authorization code exchange the code may already be spent when
    /// the outage hit (a store deadline firing after the consume ran, or a
    /// ledger write failing after it), so a retry can come back as
    /// `invalid_grant`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

impl From<StorageError> for OAuthError {
    fn from(error: StorageError) -> Self {
        if error.is_unavailable() {
            Self::ServiceUnavailable(error.to_string())
        } else {
            Self::ServerError(error.to_string())
        }
    }
}

impl From<CodeError> for OAuthError {
    fn from(error: CodeError) -> Self {
        match error {
            CodeError::NotFound => Self::CodeNotFound,
            CodeError::AlreadyConsumed => {
                Self::Conflict("authorization code already consumed".to_string())
            }
            CodeError::Expired => Self::Expired("authorization code expired".to_string()),
            CodeError::ClientMismatch => {
                Self::ClientMismatch("authorization code was issued to another client".to_string())
            }
            CodeError::RedirectMismatch => Self::RedirectMismatch,
            CodeError::Storage(e) => e.into(),
        }
    }
}

impl From<TokenError> for OAuthError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Expired => Self::Expired("token expired".to_string()),
            TokenError::Invalid(_) | TokenError::WrongType { .. } => {
                Self::InvalidToken(error.to_string())
            }
            TokenError::SigningFailed(_) | TokenError::InvalidConfiguration(_) => {
                Self::ServerError(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(
            OAuthError::Validation("x".into()).error_code(),
            "invalid_request"
        );
        assert_eq!(
            OAuthError::ClientNotFound("app".into()).error_code(),
            "invalid_client"
        );
        assert_eq!(OAuthError::CodeNotFound.error_code(), "invalid_grant");
        assert_eq!(OAuthError::RedirectMismatch.error_code(), "invalid_grant");
        assert_eq!(
            OAuthError::InvalidScope("delete".into()).error_code(),
            "invalid_scope"
        );
        assert_eq!(
            OAuthError::UnauthorizedClient("client_credentials".into()).error_code(),
            "unauthorized_client"
        );
    }

    #[test]
    fn test_only_unavailability_is_retryable() {
        let unavailable: OAuthError = StorageError::Timeout(2000).into();
        assert!(unavailable.is_retryable());
        assert_eq!(unavailable.error_code(), "temporarily_unavailable");

        let corrupt: OAuthError = StorageError::SerializationFailed("bad json".into()).into();
        assert!(!corrupt.is_retryable());
        assert_eq!(corrupt.error_code(), "server_error");

        assert!(!OAuthError::CodeNotFound.is_retryable());
    }

    #[test]
    fn test_code_errors_map_to_taxonomy() {
        assert!(matches!(
            OAuthError::from(CodeError::AlreadyConsumed),
            OAuthError::Conflict(_)
        ));
        assert!(matches!(
            OAuthError::from(CodeError::RedirectMismatch),
            OAuthError::RedirectMismatch
        ));
        assert!(matches!(
            OAuthError::from(CodeError::Storage(StorageError::Unavailable("down".into()))),
            OAuthError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_error_strings_carry_identifier() {
        let error = TokenError::WrongType {
            expected: "access",
            found: "refresh",
        };
        assert_eq!(
            error.to_string(),
            "error-idp-token-3 Wrong token type: expected access, found refresh"
        );
    }
}
