//! In-memory entity store for tests and single-process use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::store::{Entity, EntityId, EntityStore};
use crate::error::AiError;

/// In-memory implementation of [`EntityStore`]
#[derive(Debug, Clone)]
pub struct InMemoryStore<E> {
    data: Arc<RwLock<HashMap<EntityId, E>>>,
}

impl<E: Entity> InMemoryStore<E> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a store pre-populated with entities
    pub fn with_entities(entities: impl IntoIterator<Item = E>) -> Self {
        let data = entities
            .into_iter()
            .map(|entity| (entity.id().clone(), entity))
            .collect();
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Number of stored entities
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// All stored entities, in no particular order
    pub async fn list(&self) -> Vec<E> {
        self.data.read().await.values().cloned().collect()
    }
}

impl<E: Entity> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> EntityStore for InMemoryStore<E> {
    type Entity = E;

    async fn insert(&self, entity: E) -> Result<(), AiError> {
        let mut storage = self.data.write().await;

        if storage.contains_key(entity.id()) {
            return Err(AiError::persistence(format!(
                "entity {} already exists",
                entity.id()
            )));
        }

        storage.insert(entity.id().clone(), entity);
        Ok(())
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<E>, AiError> {
        let storage = self.data.read().await;
        Ok(storage.get(id).cloned())
    }

    async fn save(&self, entity: E) -> Result<(), AiError> {
        let mut storage = self.data.write().await;

        match storage.get_mut(entity.id()) {
            Some(slot) => {
                *slot = entity;
                Ok(())
            }
            None => Err(AiError::entity_not_found(entity.id().to_string())),
        }
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, AiError> {
        let mut storage = self.data.write().await;
        Ok(storage.remove(id).is_some())
    }
}
