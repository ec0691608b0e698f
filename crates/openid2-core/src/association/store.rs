//! Association stores
//!
//! Both sides keep associations in a store shared by every session on that
//! side. The in-memory implementations are `DashMap`-backed and safe for
//! concurrent use.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{Association, AssociationType};
use crate::error::Result;

/// Provider-side association store (shared or private associations)
#[async_trait]
pub trait ServerAssociationStore: Send + Sync + std::fmt::Debug {
    /// Generate and remember a new association
    async fn generate(
        &self,
        assoc_type: AssociationType,
        lifetime: Duration,
    ) -> Result<Association>;

    /// Look up a live association by handle
    async fn load(&self, handle: &str) -> Option<Association>;

    /// Forget an association, returning it if it was live
    async fn remove(&self, handle: &str) -> Option<Association>;

    /// Drop expired associations, returning how many were removed
    async fn cleanup_expired(&self) -> usize;
}

/// Relying-party association store, keyed by provider endpoint
#[async_trait]
pub trait ConsumerAssociationStore: Send + Sync + std::fmt::Debug {
    /// Remember an association established with `op_endpoint`
    async fn save(&self, op_endpoint: &str, association: Association);

    /// Look up a live association by endpoint and handle
    async fn load(&self, op_endpoint: &str, handle: &str) -> Option<Association>;

    /// The live association with the longest remaining lifetime for `op_endpoint`
    async fn latest(&self, op_endpoint: &str) -> Option<Association>;

    /// Forget an association (e.g. after the provider invalidated it)
    async fn remove(&self, op_endpoint: &str, handle: &str);

    /// Drop expired associations, returning how many were removed
    async fn cleanup_expired(&self) -> usize;
}

/// In-memory provider association store
#[derive(Debug, Default)]
pub struct MemoryServerAssociationStore {
    associations: DashMap<String, Association>,
}

impl MemoryServerAssociationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered associations, expired ones included
    pub fn len(&self) -> usize {
        self.associations.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }
}

#[async_trait]
impl ServerAssociationStore for MemoryServerAssociationStore {
    async fn generate(
        &self,
        assoc_type: AssociationType,
        lifetime: Duration,
    ) -> Result<Association> {
        let association = Association::generate(assoc_type, lifetime)?;
        self.associations
            .insert(association.handle().to_string(), association.clone());
        debug!(handle = association.handle(), "generated association");
        Ok(association)
    }

    async fn load(&self, handle: &str) -> Option<Association> {
        let association = self.associations.get(handle)?.clone();
        if association.is_expired() {
            self.associations.remove(handle);
            return None;
        }
        Some(association)
    }

    async fn remove(&self, handle: &str) -> Option<Association> {
        self.associations
            .remove(handle)
            .map(|(_, association)| association)
            .filter(|association| !association.is_expired())
    }

    async fn cleanup_expired(&self) -> usize {
        let before = self.associations.len();
        self.associations.retain(|_, association| !association.is_expired());
        before - self.associations.len()
    }
}

/// In-memory relying-party association store
#[derive(Debug, Default)]
pub struct MemoryConsumerAssociationStore {
    associations: DashMap<(String, String), Association>,
}

impl MemoryConsumerAssociationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsumerAssociationStore for MemoryConsumerAssociationStore {
    async fn save(&self, op_endpoint: &str, association: Association) {
        self.associations.insert(
            (op_endpoint.to_string(), association.handle().to_string()),
            association,
        );
    }

    async fn load(&self, op_endpoint: &str, handle: &str) -> Option<Association> {
        self.associations
            .get(&(op_endpoint.to_string(), handle.to_string()))
            .map(|entry| entry.clone())
            .filter(|association| !association.is_expired())
    }

    async fn latest(&self, op_endpoint: &str) -> Option<Association> {
        self.associations
            .iter()
            .filter(|entry| entry.key().0 == op_endpoint && !entry.value().is_expired())
            .max_by_key(|entry| entry.value().expires_at())
            .map(|entry| entry.value().clone())
    }

    async fn remove(&self, op_endpoint: &str, handle: &str) {
        self.associations
            .remove(&(op_endpoint.to_string(), handle.to_string()));
    }

    async fn cleanup_expired(&self) -> usize {
        let before = self.associations.len();
        self.associations.retain(|_, association| !association.is_expired());
        before - self.associations.len()
    }
}
