//! Grant orchestration.
//!
//! `OAuthFlowCoordinator` is the only surface the request-handling layer
//! talks to. It authenticates clients against the registry, dispatches on
//! the grant type, mints tokens and records them in the revocation ledger.
//! Store failures on issuance paths surface as `ServiceUnavailable`; the
//! coordinator never retries on its own.

use crate::clock::Clock;
use crate::errors::{OAuthError, StorageError};
use crate::oauth::clients::{ClientRegistry, ScopeValidator};
use crate::oauth::code_store::AuthorizationCodeStore;
use crate::oauth::token_cache::{TokenCache, TokenMetadata, token_id};
use crate::oauth::token_issuer::{IssuedToken, TokenClaims, TokenIssuer};
use crate::oauth::types::{
    GrantRequest, GrantType, IntrospectionResponse, OAuthClient, TokenResponse, join_scopes,
    parse_scope, validate_scope,
};
use crate::storage::KeyValueStore;
use std::collections::HashSet;
use std::sync::Arc;

pub struct OAuthFlowCoordinator {
    clients: Arc<dyn ClientRegistry>,
    scopes: Arc<dyn ScopeValidator>,
    issuer: TokenIssuer,
    codes: AuthorizationCodeStore,
    cache: TokenCache,
}

impl OAuthFlowCoordinator {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        scopes: Arc<dyn ScopeValidator>,
        issuer: TokenIssuer,
        codes: AuthorizationCodeStore,
        cache: TokenCache,
    ) -> Self {
        Self {
            clients,
            scopes,
            issuer,
            codes,
            cache,
        }
    }

    /// Build the code store and token cache over one shared store, using
    /// the issuer's clock for code expiry.
    pub fn with_store(
        clients: Arc<dyn ClientRegistry>,
        scopes: Arc<dyn ScopeValidator>,
        issuer: TokenIssuer,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let codes = AuthorizationCodeStore::new(store.clone(), issuer.clock().clone());
        let cache = TokenCache::new(store);
        Self::new(clients, scopes, issuer, codes, cache)
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.cache
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.issuer.clock()
    }

    /// Handle a token request (RFC 6749 Section 4.1.3, 4.4, 6)
    pub async fn handle(&self, request: GrantRequest) -> Result<TokenResponse, OAuthError> {
        let grant_type: GrantType = request
            .grant_type
            .as_deref()
            .ok_or_else(|| OAuthError::Validation("missing grant_type".to_string()))?
            .parse()?;

        let result = match grant_type {
            GrantType::AuthorizationCode => self.handle_authorization_code_grant(&request).await,
            GrantType::ClientCredentials => self.handle_client_credentials_grant(&request).await,
            GrantType::RefreshToken => self.handle_refresh_token_grant(&request).await,
        };

        if let Err(ref e) = result {
            tracing::warn!(
                grant_type = grant_type.as_str(),
                client_id = request.client_id.as_deref().unwrap_or_default(),
                error = ?e,
                "grant rejected"
            );
        }
        result
    }

    /// Issue an authorization code after the subject approved the request.
    ///
    /// An empty `scope` grants everything the client is allowed.
    pub async fn authorize(
        &self,
        client_id: &str,
        subject: &str,
        redirect_uri: &str,
        scope: Option<&str>,
    ) -> Result<String, OAuthError> {
        if subject.trim().is_empty() {
            return Err(OAuthError::Validation("missing subject".to_string()));
        }

        let client = self.resolve_client(client_id).await?;
        if !client.active {
            return Err(OAuthError::Unauthorized(format!(
                "client '{}' is inactive",
                client_id
            )));
        }
        require_grant(&client, GrantType::AuthorizationCode)?;

        if !client.has_redirect_uri(redirect_uri) {
            return Err(OAuthError::Validation(
                "redirect_uri is not registered for this client".to_string(),
            ));
        }

        let scopes = self.granted_scopes(&client, scope).await?;
        let code = self
            .codes
            .generate_code(client_id, subject, redirect_uri, &scopes)
            .await
            .map_err(issuance_failure)?;

        tracing::info!(client_id, scope = %join_scopes(&scopes), "authorization code issued");
        Ok(code)
    }

    /// Revoke an access or refresh token.
    ///
    /// Unknown, malformed and already revoked tokens succeed alike.
    pub async fn revoke(&self, token: &str) -> Result<(), OAuthError> {
        self.cache
            .revoke(&token_id(token))
            .await
            .map_err(issuance_failure)
    }

    /// Full check for revocation-sensitive callers. An unreachable ledger
    /// rejects the token.
    pub async fn validate_access_token(&self, token: &str) -> Result<TokenClaims, OAuthError> {
        let claims = self.issuer.verify_access_token(token)?;
        if !self.cache.is_active(&token_id(token)).await {
            return Err(OAuthError::InvalidToken("token is not active".to_string()));
        }
        Ok(claims)
    }

    /// Hot-path scope check. Signature, type and expiry are always
    /// enforced; a ledger outage lets the token through with a warning.
    pub async fn authorize_scopes(
        &self,
        token: &str,
        required: &HashSet<String>,
    ) -> Result<TokenClaims, OAuthError> {
        let claims = self.issuer.verify_access_token(token)?;
        let id = token_id(token);

        match self.cache.lookup(&id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(OAuthError::InvalidToken("token is not active".to_string()));
            }
            Err(e) => {
                tracing::warn!(
                    token_id = %id,
                    client_id = %claims.client_id,
                    error = ?e,
                    "revocation ledger unavailable, allowing scope check"
                );
            }
        }

        let granted = claims.scopes();
        if !required.is_subset(&granted) {
            let missing: HashSet<String> = required.difference(&granted).cloned().collect();
            return Err(OAuthError::InvalidScope(format!(
                "token lacks scope '{}'",
                join_scopes(&missing)
            )));
        }
        Ok(claims)
    }

    /// RFC 7662-style introspection; any failure reads as inactive
    pub async fn introspect(&self, token: &str) -> IntrospectionResponse {
        let Ok(claims) = self.issuer.verify_any(token) else {
            return IntrospectionResponse::inactive();
        };
        if !self.cache.is_active(&token_id(token)).await {
            return IntrospectionResponse::inactive();
        }

        IntrospectionResponse {
            active: true,
            sub: Some(claims.sub),
            client_id: Some(claims.client_id),
            scope: Some(claims.scope),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            token_type: Some(claims.token_use.as_str().to_string()),
        }
    }

    async fn handle_authorization_code_grant(
        &self,
        request: &GrantRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let code = required(&request.code, "code")?;
        let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;

        let client = self
            .authenticate_client(request, GrantType::AuthorizationCode)
            .await?;

        let binding = self
            .codes
            .exchange_code(code, &client.client_id, redirect_uri)
            .await?;

        let access = self.issuer.issue_access_token(
            &binding.subject,
            &client.client_id,
            &binding.scopes,
        )?;
        // Only clients registered for the refresh grant receive a refresh token
        let refresh = if client.allows_grant(GrantType::RefreshToken) {
            Some(self.issuer.issue_refresh_token(
                &binding.subject,
                &client.client_id,
                &binding.scopes,
            )?)
        } else {
            None
        };

        self.record(&access).await?;
        if let Some(refresh) = &refresh {
            self.record(refresh).await?;
        }

        tracing::info!(
            client_id = %client.client_id,
            grant_type = GrantType::AuthorizationCode.as_str(),
            scope = %access.claims.scope,
            "tokens issued"
        );

        let expires_in = access.expires_in(self.clock().now());
        Ok(TokenResponse::new(
            access.token,
            expires_in,
            refresh.map(|refresh| refresh.token),
            &binding.scopes,
        ))
    }

    async fn handle_client_credentials_grant(
        &self,
        request: &GrantRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let client = self
            .authenticate_client(request, GrantType::ClientCredentials)
            .await?;

        let scopes = self
            .granted_scopes(&client, request.scope.as_deref())
            .await?;

        // The client acts for itself
        let access =
            self.issuer
                .issue_access_token(&client.client_id, &client.client_id, &scopes)?;
        self.record(&access).await?;

        tracing::info!(
            client_id = %client.client_id,
            grant_type = GrantType::ClientCredentials.as_str(),
            scope = %access.claims.scope,
            "tokens issued"
        );

        let expires_in = access.expires_in(self.clock().now());
        Ok(TokenResponse::new(access.token, expires_in, None, &scopes))
    }

    async fn handle_refresh_token_grant(
        &self,
        request: &GrantRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let refresh_token = required(&request.refresh_token, "refresh_token")?;

        let client = self
            .authenticate_client(request, GrantType::RefreshToken)
            .await?;

        let claims = self.issuer.verify_refresh_token(refresh_token)?;
        if claims.client_id != client.client_id {
            return Err(OAuthError::ClientMismatch(
                "refresh token was issued to another client".to_string(),
            ));
        }

        let active = self
            .cache
            .lookup(&token_id(refresh_token))
            .await
            .map_err(issuance_failure)?;
        if active.is_none() {
            return Err(OAuthError::InvalidToken(
                "refresh token has been revoked".to_string(),
            ));
        }

        let original = claims.scopes();
        let requested = match request.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => {
                if !validate_scope(scope) {
                    return Err(OAuthError::Validation(format!(
                        "malformed scope '{}'",
                        scope
                    )));
                }
                Some(parse_scope(scope))
            }
            _ => None,
        };
        let scopes = match requested {
            Some(requested) if !requested.is_empty() => {
                if !requested.is_subset(&original) {
                    return Err(OAuthError::InvalidScope(
                        "requested scope exceeds the original grant".to_string(),
                    ));
                }
                requested
            }
            _ => original,
        };

        let access = self.issuer.issue_access_token_until(
            &claims.sub,
            &client.client_id,
            &scopes,
            Some(claims.expires_at()),
        )?;
        self.record(&access).await?;

        tracing::info!(
            client_id = %client.client_id,
            grant_type = GrantType::RefreshToken.as_str(),
            scope = %access.claims.scope,
            "tokens issued"
        );

        let expires_in = access.expires_in(self.clock().now());
        Ok(TokenResponse::new(access.token, expires_in, None, &scopes))
    }

    async fn resolve_client(&self, client_id: &str) -> Result<OAuthClient, OAuthError> {
        self.clients
            .resolve(client_id)
            .await
            .map_err(issuance_failure)?
            .ok_or_else(|| OAuthError::ClientNotFound(client_id.to_string()))
    }

    /// Resolve the client, check its secret and that it may use the grant
    async fn authenticate_client(
        &self,
        request: &GrantRequest,
        grant_type: GrantType,
    ) -> Result<OAuthClient, OAuthError> {
        let client_id = required(&request.client_id, "client_id")?;
        let client_secret = required(&request.client_secret, "client_secret")?;

        let client = self.resolve_client(client_id).await?;

        // Status is only disclosed to a caller holding the secret
        let verified = self
            .clients
            .verify_secret(client_id, client_secret)
            .await
            .map_err(issuance_failure)?;
        if !verified {
            return Err(OAuthError::Unauthorized(
                "invalid client credentials".to_string(),
            ));
        }

        if !client.active {
            return Err(OAuthError::Unauthorized(format!(
                "client '{}' is inactive",
                client_id
            )));
        }

        require_grant(&client, grant_type)?;
        Ok(client)
    }

    /// Requested scopes if within the client's allowance, otherwise the
    /// whole request fails. Nothing is narrowed silently.
    async fn granted_scopes(
        &self,
        client: &OAuthClient,
        scope: Option<&str>,
    ) -> Result<HashSet<String>, OAuthError> {
        let requested = match scope {
            Some(scope) if !scope.trim().is_empty() => {
                if !validate_scope(scope) {
                    return Err(OAuthError::Validation(format!(
                        "malformed scope '{}'",
                        scope
                    )));
                }
                parse_scope(scope)
            }
            _ => return Ok(client.allowed_scopes.clone()),
        };

        let allowed = self
            .scopes
            .is_subset_of_allowed(&client.client_id, &requested)
            .await
            .map_err(issuance_failure)?;
        if !allowed {
            return Err(OAuthError::InvalidScope(format!(
                "requested scope '{}' exceeds client allowance",
                join_scopes(&requested)
            )));
        }
        Ok(requested)
    }

    async fn record(&self, issued: &IssuedToken) -> Result<(), OAuthError> {
        let now = self.clock().now();
        let metadata = TokenMetadata {
            subject: issued.claims.sub.clone(),
            client_id: issued.claims.client_id.clone(),
            token_use: issued.claims.token_use,
            expires_at: issued.claims.expires_at(),
        };
        self.cache
            .record_active(
                &token_id(&issued.token),
                &metadata,
                metadata.expires_at - now,
            )
            .await
            .map_err(issuance_failure)
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::Validation(format!("missing {}", name)))
}

fn require_grant(client: &OAuthClient, grant_type: GrantType) -> Result<(), OAuthError> {
    if !client.allows_grant(grant_type) {
        return Err(OAuthError::UnauthorizedClient(format!(
            "client not authorized for {} grant",
            grant_type
        )));
    }
    Ok(())
}

/// Store failures on paths that must leave durable state behind
fn issuance_failure(error: StorageError) -> OAuthError {
    match error {
        StorageError::SerializationFailed(_) => OAuthError::ServerError(error.to_string()),
        other => OAuthError::ServiceUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::oauth::clients::{MemoryClientRegistry, RegistryScopeValidator, hash_client_secret};
    use crate::storage::MemoryKeyValueStore;
    use chrono::Duration;

    fn client(client_id: &str, grant_types: Vec<GrantType>) -> OAuthClient {
        OAuthClient {
            client_id: client_id.to_string(),
            client_name: None,
            client_secret_hash: hash_client_secret("s3cret"),
            redirect_uris: vec!["https://a/cb".to_string()],
            allowed_scopes: parse_scope("read write"),
            grant_types,
            active: true,
        }
    }

    fn coordinator(clients: Vec<OAuthClient>) -> (OAuthFlowCoordinator, MockClock) {
        let clock = MockClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let registry: Arc<dyn ClientRegistry> = Arc::new(MemoryClientRegistry::from_clients(clients));
        let scopes = Arc::new(RegistryScopeValidator::new(registry.clone()));
        let issuer = TokenIssuer::new(
            "idp-core",
            b"0123456789abcdef0123456789abcdef",
            Duration::minutes(15),
            Duration::days(7),
            shared.clone(),
        )
        .unwrap();
        let store = Arc::new(MemoryKeyValueStore::with_clock(shared));
        (
            OAuthFlowCoordinator::with_store(registry, scopes, issuer, store),
            clock,
        )
    }

    fn code_request(code: &str) -> GrantRequest {
        GrantRequest {
            grant_type: Some("authorization_code".to_string()),
            client_id: Some("app1".to_string()),
            client_secret: Some("s3cret".to_string()),
            code: Some(code.to_string()),
            redirect_uri: Some("https://a/cb".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_authorization_code_flow() {
        let (coordinator, _clock) = coordinator(vec![client(
            "app1",
            vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        )]);

        let code = coordinator
            .authorize("app1", "u1", "https://a/cb", Some("read"))
            .await
            .unwrap();
        let response = coordinator.handle(code_request(&code)).await.unwrap();

        assert_eq!(response.expires_in, 900);
        assert_eq!(response.scope.as_deref(), Some("read"));
        assert!(response.refresh_token.is_some());

        let claims = coordinator
            .validate_access_token(&response.access_token)
            .await
            .unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[tokio::test]
    async fn test_missing_grant_type_is_validation_error() {
        let (coordinator, _clock) = coordinator(vec![]);
        let err = coordinator
            .handle(GrantRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Validation(_)));

        let err = coordinator
            .handle(GrantRequest {
                grant_type: Some("password".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_bad_secret_does_not_consume_code() {
        let (coordinator, _clock) = coordinator(vec![client(
            "app1",
            vec![GrantType::AuthorizationCode],
        )]);
        let code = coordinator
            .authorize("app1", "u1", "https://a/cb", None)
            .await
            .unwrap();

        let mut request = code_request(&code);
        request.client_secret = Some("wrong".to_string());
        assert!(matches!(
            coordinator.handle(request).await,
            Err(OAuthError::Unauthorized(_))
        ));

        assert!(coordinator.handle(code_request(&code)).await.is_ok());
    }

    #[tokio::test]
    async fn test_grant_not_registered_for_client() {
        let (coordinator, _clock) = coordinator(vec![client(
            "app1",
            vec![GrantType::AuthorizationCode],
        )]);

        let err = coordinator
            .handle(GrantRequest {
                grant_type: Some("client_credentials".to_string()),
                client_id: Some("app1".to_string()),
                client_secret: Some("s3cret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized_client");
    }

    #[tokio::test]
    async fn test_authorize_rejects_unregistered_redirect() {
        let (coordinator, _clock) = coordinator(vec![client(
            "app1",
            vec![GrantType::AuthorizationCode],
        )]);

        assert!(matches!(
            coordinator
                .authorize("app1", "u1", "https://evil/cb", None)
                .await,
            Err(OAuthError::Validation(_))
        ));
        assert!(matches!(
            coordinator
                .authorize("ghost", "u1", "https://a/cb", None)
                .await,
            Err(OAuthError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_scopes_checks_required() {
        let (coordinator, _clock) = coordinator(vec![client(
            "app1",
            vec![GrantType::ClientCredentials],
        )]);

        let response = coordinator
            .handle(GrantRequest {
                grant_type: Some("client_credentials".to_string()),
                client_id: Some("app1".to_string()),
                client_secret: Some("s3cret".to_string()),
                scope: Some("read".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(
            coordinator
                .authorize_scopes(&response.access_token, &parse_scope("read"))
                .await
                .is_ok()
        );
        assert!(matches!(
            coordinator
                .authorize_scopes(&response.access_token, &parse_scope("write"))
                .await,
            Err(OAuthError::InvalidScope(_))
        ));
    }

    #[tokio::test]
    async fn test_introspect_reports_activity() {
        let (coordinator, clock) = coordinator(vec![client(
            "app1",
            vec![GrantType::ClientCredentials],
        )]);

        let response = coordinator
            .handle(GrantRequest {
                grant_type: Some("client_credentials".to_string()),
                client_id: Some("app1".to_string()),
                client_secret: Some("s3cret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let active = coordinator.introspect(&response.access_token).await;
        assert!(active.active);
        assert_eq!(active.sub.as_deref(), Some("app1"));
        assert_eq!(active.token_type.as_deref(), Some("access"));

        clock.advance(Duration::minutes(15));
        assert!(!coordinator.introspect(&response.access_token).await.active);
        assert!(!coordinator.introspect("garbage").await.active);
    }
}
