//! Pipeline implementation.
//!
//! The pipeline wires one (possibly layered) provider to a response cache,
//! a request manager and a persistence coordinator:
//!
//! ```text
//! generate:           cache ─hit─> envelope
//!                       └─miss─> submit ─> execute ─> cache on success
//! generate_and_merge: generate ─> merge_response
//! ```

use crate::binder::{Bindable, Property};
use crate::cache::{CacheConfig, ResponseCache};
use crate::error::AiError;
use crate::layer::Layer;
use crate::persistence::{
    EntityId, EntityStore, MergeObserver, MergeOptions, PersistenceCoordinator,
};
use crate::provider::Provider;
use crate::request::{ManagerConfig, RequestManager};
use crate::types::*;
use crate::validation::{ValidationRule, Validator};
use std::sync::Arc;

/// Type-erased provider that can be shared across tasks
type BoxedProvider = Arc<dyn Provider>;

/// Metadata key set on envelopes served from the cache
pub const CACHE_METADATA_KEY: &str = "cache";

/// Builder for composing a provider with layers, cache and persistence.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder(provider)
///     .layer(LoggingLayer::new())
///     .cache_config(CacheConfig::new().with_max_entries(500))
///     .observer(Arc::new(AuditObserver::default()))
///     .finish(InMemoryStore::new());
/// ```
pub struct PipelineBuilder<P> {
    provider: P,
    cache_config: CacheConfig,
    manager_config: ManagerConfig,
    observers: Vec<Arc<dyn MergeObserver>>,
    validator: Option<Arc<Validator>>,
    rules: Vec<ValidationRule>,
}

impl<P: Provider> PipelineBuilder<P> {
    /// Create a new builder with a provider
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cache_config: CacheConfig::default(),
            manager_config: ManagerConfig::default(),
            observers: Vec::new(),
            validator: None,
            rules: Vec::new(),
        }
    }

    /// Add a layer to wrap the provider
    ///
    /// Each call wraps the previous provider, so the last layer added is
    /// the outermost.
    pub fn layer<L>(self, layer: L) -> PipelineBuilder<L::LayeredProvider>
    where
        L: Layer<P>,
    {
        PipelineBuilder {
            provider: layer.layer(self.provider),
            cache_config: self.cache_config,
            manager_config: self.manager_config,
            observers: self.observers,
            validator: self.validator,
            rules: self.rules,
        }
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn manager_config(mut self, config: ManagerConfig) -> Self {
        self.manager_config = config;
        self
    }

    /// Add a merge observer
    pub fn observer(mut self, observer: Arc<dyn MergeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Share an existing validator and its rule registry
    pub fn validator(mut self, validator: Arc<Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Register a custom validation rule
    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Finish building, persisting merges into `store`
    pub fn finish<S: EntityStore>(self, store: S) -> Pipeline<S> {
        let validator = self.validator.unwrap_or_default();
        for rule in self.rules {
            validator.add_rule(rule);
        }

        let coordinator = PersistenceCoordinator::with_validator(store, validator);
        for observer in self.observers {
            coordinator.add_observer(observer);
        }

        Pipeline {
            provider: Arc::new(self.provider),
            cache: ResponseCache::with_config(self.cache_config),
            manager: RequestManager::with_config(self.manager_config),
            coordinator,
        }
    }
}

/// End-to-end generation and persistence runtime.
///
/// Start from [`Pipeline::builder`]; the store type is fixed by
/// [`PipelineBuilder::finish`].
pub struct Pipeline<S> {
    provider: BoxedProvider,
    cache: ResponseCache<Content>,
    manager: RequestManager,
    coordinator: PersistenceCoordinator<S>,
}

impl Pipeline<()> {
    /// Create a new builder
    pub fn builder<P: Provider>(provider: P) -> PipelineBuilder<P> {
        PipelineBuilder::new(provider)
    }
}

impl<S: EntityStore> Pipeline<S> {
    /// Get provider information
    pub fn info(&self) -> Arc<ProviderInfo> {
        self.provider.info()
    }

    pub fn cache(&self) -> &ResponseCache<Content> {
        &self.cache
    }

    pub fn manager(&self) -> &RequestManager {
        &self.manager
    }

    pub fn coordinator(&self) -> &PersistenceCoordinator<S> {
        &self.coordinator
    }

    pub fn store(&self) -> &S {
        self.coordinator.store()
    }

    /// Generate content for a prompt.
    ///
    /// Served from the cache when an unexpired entry exists for the same
    /// provider, prompt and parameters; such envelopes carry
    /// `cache = "hit"` metadata and are not tracked by the manager.
    /// Provider failures come back as failed envelopes and are not cached.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        parameters: Parameters,
    ) -> Result<ResponseEnvelope, AiError> {
        let provider_info = self.provider.info();
        let request = Request::new(provider_info.id.clone(), prompt).with_parameters(parameters);

        if let Some(content) = self
            .cache
            .get(&request.provider_id, &request.prompt, &request.parameters)
            .await
        {
            tracing::debug!(
                "[Pipeline] cache hit: provider={}, request={}",
                provider_info.id,
                request.id
            );
            return Ok(
                ResponseEnvelope::success(request.id, provider_info.id.clone(), content)
                    .with_metadata(CACHE_METADATA_KEY, "hit"),
            );
        }

        let id = self.manager.submit(request.clone())?;
        let envelope = self
            .manager
            .execute_with_provider(id, self.provider.clone())
            .await?;

        if let Some(content) = envelope.content() {
            self.cache
                .set(
                    content.clone(),
                    &request.provider_id,
                    &request.prompt,
                    &request.parameters,
                )
                .await;
        }

        Ok(envelope)
    }

    /// Generate content and merge it into `property` of entity `entity_id`.
    ///
    /// Returns the envelope on success. A failed generation is reported to
    /// merge observers and returned as `Err`.
    pub async fn generate_and_merge<T: Bindable>(
        &self,
        prompt: impl Into<String>,
        parameters: Parameters,
        entity_id: &EntityId,
        property: &Property<S::Entity, T>,
        options: &MergeOptions,
    ) -> Result<ResponseEnvelope, AiError> {
        let envelope = self.generate(prompt, parameters).await?;
        self.coordinator
            .merge_response(&envelope, entity_id, property, options)
            .await?;
        Ok(envelope)
    }

    /// Run many requests against the provider without the cache, results in
    /// input order
    pub async fn generate_batch(
        &self,
        requests: Vec<Request>,
    ) -> Vec<Result<ResponseEnvelope, AiError>> {
        let provider = self.provider.clone();
        self.manager
            .execute_batch(requests, move |request| {
                let provider = provider.clone();
                async move { provider.generate(&request.prompt, &request.parameters).await }
            })
            .await
    }
}
