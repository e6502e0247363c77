//! Entity store abstraction.

use crate::error::AiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random id
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// A persisted object that generated content can be merged into
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> &EntityId;
}

/// Store trait for entities.
///
/// `save` must replace the stored entity atomically: readers observe either
/// the old or the new version, never a mix.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    type Entity: Entity;

    /// Insert a new entity
    async fn insert(&self, entity: Self::Entity) -> Result<(), AiError>;

    /// Get an entity by ID
    async fn fetch(&self, id: &EntityId) -> Result<Option<Self::Entity>, AiError>;

    /// Replace an existing entity
    async fn save(&self, entity: Self::Entity) -> Result<(), AiError>;

    /// Delete an entity, returning whether it existed
    async fn delete(&self, id: &EntityId) -> Result<bool, AiError>;

    /// Check if an entity exists
    async fn exists(&self, id: &EntityId) -> Result<bool, AiError> {
        Ok(self.fetch(id).await?.is_some())
    }
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityStore for Arc<S> {
    type Entity = S::Entity;

    async fn insert(&self, entity: Self::Entity) -> Result<(), AiError> {
        (**self).insert(entity).await
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<Self::Entity>, AiError> {
        (**self).fetch(id).await
    }

    async fn save(&self, entity: Self::Entity) -> Result<(), AiError> {
        (**self).save(entity).await
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, AiError> {
        (**self).delete(id).await
    }

    async fn exists(&self, id: &EntityId) -> Result<bool, AiError> {
        (**self).exists(id).await
    }
}
