//! Revocation ledger for issued tokens.
//!
//! Every issued token gets an entry keyed by the SHA-256 of the token, with
//! a TTL equal to the token's remaining lifetime. A token without an entry
//! is inactive, so revoking is just deleting the entry.

use crate::errors::StorageError;
use crate::oauth::types::TokenUse;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const KEY_PREFIX: &str = "active_token";

/// Stable identifier for a token; the raw token is never stored
pub fn token_id(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Minimal metadata kept alongside an active token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub subject: String,
    pub client_id: String,
    pub token_use: TokenUse,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn KeyValueStore>,
}

impl TokenCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(token_id: &str) -> String {
        format!("{}:{}", KEY_PREFIX, token_id)
    }

    /// Mark a token active for `ttl`
    pub async fn record_active(
        &self,
        token_id: &str,
        metadata: &TokenMetadata,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_string(metadata)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        // A zero TTL would expire on write
        let ttl = ttl.max(Duration::seconds(1));
        self.store.put(&Self::key(token_id), &value, ttl).await?;

        tracing::debug!(
            token_id,
            client_id = %metadata.client_id,
            token_use = metadata.token_use.as_str(),
            "token recorded active"
        );
        Ok(())
    }

    /// Metadata of an active token, or `None` once revoked or expired
    pub async fn lookup(&self, token_id: &str) -> Result<Option<TokenMetadata>, StorageError> {
        match self.store.get(&Self::key(token_id)).await? {
            Some(value) => serde_json::from_str(&value)
                .map(Some)
                .map_err(|e| StorageError::SerializationFailed(e.to_string())),
            None => Ok(None),
        }
    }

    /// Revocation check. An unreachable or corrupt ledger reads as inactive.
    pub async fn is_active(&self, token_id: &str) -> bool {
        match self.lookup(token_id).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::warn!(token_id, error = ?e, "revocation check failed, treating token as inactive");
                false
            }
        }
    }

    /// Remove a token's entry. Absent entries are not an error.
    pub async fn revoke(&self, token_id: &str) -> Result<(), StorageError> {
        let removed = self.store.delete(&Self::key(token_id)).await?;
        tracing::info!(token_id, removed, "token revoked");
        Ok(())
    }
}
