//! Signed access and refresh token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying a `type` claim. Verification checks the
//! signature and issuer with `jsonwebtoken`, then applies the type and
//! expiry checks itself against the injected clock, with no leeway.

use crate::clock::Clock;
use crate::errors::TokenError;
use crate::oauth::types::{TokenUse, join_scopes, parse_scope};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Minimum HMAC key length accepted by the issuer
pub const MIN_SECRET_LEN: usize = 32;

/// Claims carried by every token this issuer signs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// Subject: the end user, or the client itself for client_credentials
    pub sub: String,
    pub client_id: String,
    /// Space-delimited, sorted
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique per token, so two tokens minted in the same second differ
    pub jti: String,
    #[serde(rename = "type")]
    pub token_use: TokenUse,
}

impl TokenClaims {
    pub fn scopes(&self) -> HashSet<String> {
        parse_scope(&self.scope)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A freshly signed token with its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    /// Seconds from `now` until expiry, floored at zero
    pub fn expires_in(&self, now: DateTime<Utc>) -> u64 {
        (self.claims.exp - now.timestamp()).max(0) as u64
    }
}

/// Stateless token signer/verifier
#[derive(Clone)]
pub struct TokenIssuer {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Create a new HS256 issuer.
    ///
    /// Fails when the secret is shorter than [`MIN_SECRET_LEN`], a lifetime
    /// is not positive, or access tokens would outlive refresh tokens.
    pub fn new(
        issuer: impl Into<String>,
        secret: &[u8],
        access_token_lifetime: Duration,
        refresh_token_lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::InvalidConfiguration(format!(
                "signing secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if access_token_lifetime <= Duration::zero() || refresh_token_lifetime <= Duration::zero()
        {
            return Err(TokenError::InvalidConfiguration(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if access_token_lifetime > refresh_token_lifetime {
            return Err(TokenError::InvalidConfiguration(
                "access token lifetime exceeds refresh token lifetime".to_string(),
            ));
        }

        Ok(Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_lifetime,
            refresh_token_lifetime,
            clock,
        })
    }

    pub fn access_token_lifetime(&self) -> Duration {
        self.access_token_lifetime
    }

    pub fn refresh_token_lifetime(&self) -> Duration {
        self.refresh_token_lifetime
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn issue_access_token(
        &self,
        subject: &str,
        client_id: &str,
        scopes: &HashSet<String>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_access_token_until(subject, client_id, scopes, None)
    }

    /// Issue an access token whose expiry never passes `not_after`
    pub fn issue_access_token_until(
        &self,
        subject: &str,
        client_id: &str,
        scopes: &HashSet<String>,
        not_after: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let mut expires_at = now + self.access_token_lifetime;
        if let Some(limit) = not_after {
            expires_at = expires_at.min(limit);
        }
        self.sign(
            TokenUse::Access,
            subject,
            client_id,
            join_scopes(scopes),
            now,
            expires_at,
        )
    }

    /// Issue a refresh token carrying the full scope of the original grant
    pub fn issue_refresh_token(
        &self,
        subject: &str,
        client_id: &str,
        scopes: &HashSet<String>,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        self.sign(
            TokenUse::Refresh,
            subject,
            client_id,
            join_scopes(scopes),
            now,
            now + self.refresh_token_lifetime,
        )
    }

    pub fn verify_access_token(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify(token, TokenUse::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify(token, TokenUse::Refresh)
    }

    /// Verify signature and expiry, accepting either token type
    pub fn verify_any(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;
        self.check_expiry(&claims)?;
        Ok(claims)
    }

    fn sign(
        &self,
        token_use: TokenUse,
        subject: &str,
        client_id: &str,
        scope: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            client_id: client_id.to_string(),
            scope,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_use,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(error = ?e, token_use = token_use.as_str(), "token signing failed");
                TokenError::SigningFailed(e.to_string())
            })?;

        Ok(IssuedToken { token, claims })
    }

    fn verify(&self, token: &str, expected: TokenUse) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;

        if claims.token_use != expected {
            return Err(TokenError::WrongType {
                expected: expected.as_str(),
                found: claims.token_use.as_str(),
            });
        }

        self.check_expiry(&claims)?;
        Ok(claims)
    }

    fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::Invalid("invalid signature".to_string()),
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    fn check_expiry(&self, claims: &TokenClaims) -> Result<(), TokenError> {
        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}
