//! OAuth 2.x delegated authorization: token issuance, one-time codes,
//! revocation and grant orchestration.

pub mod clients;
pub mod code_store;
pub mod coordinator;
pub mod token_cache;
pub mod token_issuer;
pub mod types;

// Re-export frequently used items from each module
pub use clients::{
    ClientRegistry, MemoryClientRegistry, RegistryScopeValidator, ScopeValidator,
    hash_client_secret,
};
pub use code_store::{
    AUTHORIZATION_CODE_LIFETIME_SECS, AuthorizationCodeStore, authorization_code_lifetime,
};
pub use coordinator::OAuthFlowCoordinator;
pub use token_cache::{TokenCache, TokenMetadata, token_id};
pub use token_issuer::{IssuedToken, TokenClaims, TokenIssuer};
pub use types::{
    AuthorizationCode, GrantRequest, GrantType, IntrospectionResponse, OAuthClient,
    OAuthErrorResponse, TokenResponse, TokenType, TokenUse, join_scopes, parse_scope,
};
