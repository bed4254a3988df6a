//! In-memory client registry.
//!
//! Holds registrations loaded from a JSON file or added at runtime, and
//! checks client secrets against their stored SHA-256 digests in constant
//! time.

use super::{ClientRegistry, Result, ScopeValidator};
use crate::errors::{ConfigError, StorageError};
use crate::oauth::types::{GrantType, OAuthClient, generate_token, validate_scope};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use subtle::ConstantTimeEq;
use url::Url;
use uuid::Uuid;

/// Hex SHA-256 digest stored in place of a client secret
pub fn hash_client_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory implementation of the client registry
#[derive(Default)]
pub struct MemoryClientRegistry {
    clients: RwLock<HashMap<String, OAuthClient>>,
}

impl MemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_clients(clients: impl IntoIterator<Item = OAuthClient>) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.client_id.clone(), client))
            .collect();
        Self {
            clients: RwLock::new(clients),
        }
    }

    /// Load registrations from a JSON array of `OAuthClient` records
    pub async fn from_json_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_display = path.display().to_string();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ClientsFileFailed(path_display.clone(), e.to_string()))?;
        let clients: Vec<OAuthClient> = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ClientsFileFailed(path_display.clone(), e.to_string()))?;

        for client in &clients {
            validate_client(client).map_err(|e| ConfigError::ClientsFileFailed(path_display.clone(), e))?;
        }

        tracing::info!(path = %path_display, count = clients.len(), "loaded client registrations");
        Ok(Self::from_clients(clients))
    }

    /// Store or replace a registration
    pub fn insert(&self, client: OAuthClient) -> Result<()> {
        validate_client(&client).map_err(StorageError::SerializationFailed)?;
        let mut clients = self
            .clients
            .write()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    /// Register a new client with generated credentials.
    ///
    /// Returns the registration and the plaintext secret, which is not
    /// retained.
    pub fn register(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
        allowed_scopes: HashSet<String>,
        grant_types: Vec<GrantType>,
    ) -> Result<(OAuthClient, String)> {
        let secret = generate_token();
        let client = OAuthClient {
            client_id: Uuid::new_v4().to_string(),
            client_name,
            client_secret_hash: hash_client_secret(&secret),
            redirect_uris,
            allowed_scopes,
            grant_types,
            active: true,
        };
        self.insert(client.clone())?;
        Ok((client, secret))
    }

    /// Flip the active flag of a registration
    pub fn set_active(&self, client_id: &str, active: bool) -> Result<bool> {
        let mut clients = self
            .clients
            .write()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(match clients.get_mut(client_id) {
            Some(client) => {
                client.active = active;
                true
            }
            None => false,
        })
    }

    fn get(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        let clients = self
            .clients
            .read()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(clients.get(client_id).cloned())
    }
}

fn validate_client(client: &OAuthClient) -> std::result::Result<(), String> {
    if client.client_id.trim().is_empty() {
        return Err("client_id must not be empty".to_string());
    }

    for redirect_uri in &client.redirect_uris {
        let url = Url::parse(redirect_uri)
            .map_err(|e| format!("invalid redirect URI '{}': {}", redirect_uri, e))?;
        if url.fragment().is_some() {
            return Err(format!(
                "redirect URI '{}' must not contain a fragment",
                redirect_uri
            ));
        }
    }

    if let Some(bad) = client.allowed_scopes.iter().find(|s| !validate_scope(s)) {
        return Err(format!("invalid scope '{}'", bad));
    }

    Ok(())
}

#[async_trait]
impl ClientRegistry for MemoryClientRegistry {
    async fn resolve(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        self.get(client_id)
    }

    async fn verify_secret(&self, client_id: &str, secret: &str) -> Result<bool> {
        let Some(client) = self.get(client_id)? else {
            return Ok(false);
        };
        let presented = hash_client_secret(secret);
        Ok(presented
            .as_bytes()
            .ct_eq(client.client_secret_hash.as_bytes())
            .into())
    }
}

/// Scope validator that consults the registry's allowed scopes
pub struct RegistryScopeValidator {
    registry: Arc<dyn ClientRegistry>,
}

impl RegistryScopeValidator {
    pub fn new(registry: Arc<dyn ClientRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ScopeValidator for RegistryScopeValidator {
    async fn is_subset_of_allowed(
        &self,
        client_id: &str,
        requested_scopes: &HashSet<String>,
    ) -> Result<bool> {
        Ok(match self.registry.resolve(client_id).await? {
            Some(client) => requested_scopes.is_subset(&client.allowed_scopes),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::parse_scope;

    fn app1() -> OAuthClient {
        OAuthClient {
            client_id: "app1".to_string(),
            client_name: Some("App One".to_string()),
            client_secret_hash: hash_client_secret("s3cret"),
            redirect_uris: vec!["https://a/cb".to_string()],
            allowed_scopes: parse_scope("read write"),
            grant_types: vec![GrantType::AuthorizationCode, GrantType::ClientCredentials],
            active: true,
        }
    }

    #[tokio::test]
    async fn test_verify_secret() {
        let registry = MemoryClientRegistry::from_clients([app1()]);

        assert!(registry.verify_secret("app1", "s3cret").await.unwrap());
        assert!(!registry.verify_secret("app1", "wrong").await.unwrap());
        assert!(!registry.verify_secret("unknown", "s3cret").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_generates_credentials() {
        let registry = MemoryClientRegistry::new();
        let (client, secret) = registry
            .register(
                Some("Generated".to_string()),
                vec!["https://app.example.com/callback".to_string()],
                parse_scope("read"),
                vec![GrantType::AuthorizationCode],
            )
            .unwrap();

        assert_ne!(client.client_secret_hash, secret);
        assert!(
            registry
                .verify_secret(&client.client_id, &secret)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_insert_rejects_relative_redirect() {
        let registry = MemoryClientRegistry::new();
        let mut client = app1();
        client.redirect_uris = vec!["/callback".to_string()];

        assert!(registry.insert(client).is_err());
    }

    #[tokio::test]
    async fn test_scope_validator_uses_allowance() {
        let registry: Arc<dyn ClientRegistry> = Arc::new(MemoryClientRegistry::from_clients([app1()]));
        let validator = RegistryScopeValidator::new(registry);

        assert!(
            validator
                .is_subset_of_allowed("app1", &parse_scope("read write"))
                .await
                .unwrap()
        );
        assert!(
            !validator
                .is_subset_of_allowed("app1", &parse_scope("read write delete"))
                .await
                .unwrap()
        );
        assert!(
            !validator
                .is_subset_of_allowed("ghost", &parse_scope("read"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("idp-clients-{}.json", Uuid::new_v4()));
        let clients = serde_json::to_string(&vec![app1()]).unwrap();
        tokio::fs::write(&path, clients).await.unwrap();

        let registry = MemoryClientRegistry::from_json_file(&path).await.unwrap();
        let client = registry.resolve("app1").await.unwrap().unwrap();
        assert_eq!(client.allowed_scopes, parse_scope("read write"));

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
