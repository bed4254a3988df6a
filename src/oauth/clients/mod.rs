//! OAuth client lookup and authentication.
//!
//! The registry is an external collaborator: the core only resolves
//! clients, checks secrets, and asks whether requested scopes fall within a
//! client's allowance. `MemoryClientRegistry` backs tests and the admin CLI.

pub mod registry;

use crate::errors::StorageError;
use crate::oauth::types::OAuthClient;
use async_trait::async_trait;
use std::collections::HashSet;

pub use registry::{MemoryClientRegistry, RegistryScopeValidator, hash_client_secret};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Resolves client identifiers to registrations
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Retrieve a client by ID
    async fn resolve(&self, client_id: &str) -> Result<Option<OAuthClient>>;

    /// Check a presented secret against the stored hash.
    ///
    /// Unknown clients yield `false`.
    async fn verify_secret(&self, client_id: &str, secret: &str) -> Result<bool>;
}

/// Decides whether requested scopes fall within a client's allowance
#[async_trait]
pub trait ScopeValidator: Send + Sync {
    async fn is_subset_of_allowed(
        &self,
        client_id: &str,
        requested_scopes: &HashSet<String>,
    ) -> Result<bool>;
}
