//! One-time authorization codes.
//!
//! A code is an opaque 256-bit value; only its SHA-256 digest is used as a
//! store key. Exchange goes through [`KeyValueStore::consume`], so the read
//! and the delete are one step and every outcome, including a mismatch,
//! leaves the code spent.

use crate::clock::Clock;
use crate::errors::{CodeError, StorageError};
use crate::oauth::types::{AuthorizationCode, generate_token};
use crate::storage::{Consumed, KeyValueStore};
use chrono::Duration;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Fixed, non-renewable code lifetime in seconds
pub const AUTHORIZATION_CODE_LIFETIME_SECS: i64 = 600;

pub fn authorization_code_lifetime() -> Duration {
    Duration::seconds(AUTHORIZATION_CODE_LIFETIME_SECS)
}

const KEY_PREFIX: &str = "authorization_code";

fn code_key(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{}:{}", KEY_PREFIX, hex::encode(hasher.finalize()))
}

#[derive(Clone)]
pub struct AuthorizationCodeStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl AuthorizationCodeStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a code bound to the client, subject, redirect URI and scopes
    pub async fn generate_code(
        &self,
        client_id: &str,
        subject: &str,
        redirect_uri: &str,
        scopes: &HashSet<String>,
    ) -> Result<String, StorageError> {
        let code = generate_token();
        let now = self.clock.now();
        let binding = AuthorizationCode {
            client_id: client_id.to_string(),
            subject: subject.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes: scopes.clone(),
            created_at: now,
            expires_at: now + authorization_code_lifetime(),
        };

        let value = serde_json::to_string(&binding)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        self.store
            .put(&code_key(&code), &value, authorization_code_lifetime())
            .await?;

        tracing::debug!(client_id, "authorization code issued");
        Ok(code)
    }

    /// Consume a code and check it against the exchanging client.
    ///
    /// The code is gone once this returns, whatever the result. A store
    /// failure may or may not have consumed it first.
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationCode, CodeError> {
        let value = match self
            .store
            .consume(&code_key(code), authorization_code_lifetime())
            .await?
        {
            Consumed::Value(value) => value,
            Consumed::AlreadyConsumed => {
                tracing::warn!(client_id, "authorization code replayed");
                return Err(CodeError::AlreadyConsumed);
            }
            Consumed::Missing => return Err(CodeError::NotFound),
        };

        let binding: AuthorizationCode = serde_json::from_str(&value)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;

        // Stores with coarse expiry may hand back a record past its deadline
        if binding.expires_at <= self.clock.now() {
            return Err(CodeError::Expired);
        }

        if binding.client_id != client_id {
            tracing::warn!(
                client_id,
                bound_client_id = %binding.client_id,
                "authorization code presented by another client"
            );
            return Err(CodeError::ClientMismatch);
        }

        if binding.redirect_uri != redirect_uri {
            tracing::warn!(client_id, "authorization code redirect URI mismatch");
            return Err(CodeError::RedirectMismatch);
        }

        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::oauth::types::parse_scope;
    use crate::storage::MemoryKeyValueStore;
    use async_trait::async_trait;

    fn code_store() -> (AuthorizationCodeStore, MockClock) {
        let clock = MockClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryKeyValueStore::with_clock(shared.clone()));
        (AuthorizationCodeStore::new(store, shared), clock)
    }

    #[tokio::test]
    async fn test_exchange_once() {
        let (codes, _clock) = code_store();
        let code = codes
            .generate_code("app1", "u1", "https://a/cb", &parse_scope("read"))
            .await
            .unwrap();

        let binding = codes
            .exchange_code(&code, "app1", "https://a/cb")
            .await
            .unwrap();
        assert_eq!(binding.subject, "u1");
        assert_eq!(binding.scopes, parse_scope("read"));
        assert_eq!(
            binding.expires_at - binding.created_at,
            authorization_code_lifetime()
        );

        assert!(matches!(
            codes.exchange_code(&code, "app1", "https://a/cb").await,
            Err(CodeError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_mismatch_consumes_code() {
        let (codes, _clock) = code_store();
        let code = codes
            .generate_code("app1", "u1", "https://a/cb", &parse_scope("read"))
            .await
            .unwrap();

        assert!(matches!(
            codes.exchange_code(&code, "app2", "https://a/cb").await,
            Err(CodeError::ClientMismatch)
        ));
        assert!(matches!(
            codes.exchange_code(&code, "app1", "https://a/cb").await,
            Err(CodeError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_expired_after_ten_minutes() {
        let (codes, clock) = code_store();
        let code = codes
            .generate_code("app1", "u1", "https://a/cb", &parse_scope("read"))
            .await
            .unwrap();

        clock.advance(authorization_code_lifetime());

        assert!(matches!(
            codes.exchange_code(&code, "app1", "https://a/cb").await,
            Err(CodeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let (codes, _clock) = code_store();
        assert!(matches!(
            codes.exchange_code("nope", "app1", "https://a/cb").await,
            Err(CodeError::NotFound)
        ));
    }

    /// Store that ignores TTLs, to reach the record-level expiry check
    struct NoExpiryStore(MemoryKeyValueStore);

    #[async_trait]
    impl KeyValueStore for NoExpiryStore {
        async fn put(&self, key: &str, value: &str, _ttl: Duration) -> crate::storage::Result<()> {
            self.0.put(key, value, Duration::days(365)).await
        }
        async fn get(&self, key: &str) -> crate::storage::Result<Option<String>> {
            self.0.get(key).await
        }
        async fn delete(&self, key: &str) -> crate::storage::Result<bool> {
            self.0.delete(key).await
        }
        async fn consume(&self, key: &str, ttl: Duration) -> crate::storage::Result<Consumed> {
            self.0.consume(key, ttl).await
        }
        async fn purge_expired(&self) -> crate::storage::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_record_expiry_checked_independently_of_store() {
        let clock = MockClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(NoExpiryStore(MemoryKeyValueStore::with_clock(
            shared.clone(),
        )));
        let codes = AuthorizationCodeStore::new(store, shared);

        let code = codes
            .generate_code("app1", "u1", "https://a/cb", &parse_scope("read"))
            .await
            .unwrap();
        clock.advance(authorization_code_lifetime() + Duration::seconds(1));

        assert!(matches!(
            codes.exchange_code(&code, "app1", "https://a/cb").await,
            Err(CodeError::Expired)
        ));
    }
}
