//! Single-writer merge of provider output into stored entities.

use super::observer::{MergeContext, MergeObserver, ObserverSet};
use super::store::{EntityId, EntityStore};
use crate::binder::{Bindable, Property, PropertyBinder};
use crate::error::AiError;
use crate::types::{Content, ResponseEnvelope};
use crate::validation::{Constraints, Validator};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Custom conversion from generated content to the value that gets bound
pub type Transform = Arc<dyn Fn(Content) -> Result<Value, AiError> + Send + Sync>;

/// Per-merge options
#[derive(Clone, Default)]
pub struct MergeOptions {
    pub transform: Option<Transform>,
    pub constraints: Constraints,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default content conversion
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Content) -> Result<Value, AiError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Add one constraint, e.g. `("minLength", "5")`
    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints.extend(constraints);
        self
    }
}

impl fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOptions")
            .field("transform", &self.transform.is_some())
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// Merges response envelopes into entities of one store.
///
/// Every merge takes the coordinator's writer lock from fetch to save, so
/// merges never interleave and a failed merge leaves the stored entity as
/// it was.
pub struct PersistenceCoordinator<S> {
    store: S,
    validator: Arc<Validator>,
    binder: PropertyBinder,
    observers: ObserverSet,
    writer: Mutex<()>,
}

impl<S: EntityStore> PersistenceCoordinator<S> {
    /// Create a coordinator with an empty rule registry
    pub fn new(store: S) -> Self {
        Self::with_validator(store, Arc::new(Validator::new()))
    }

    /// Create a coordinator sharing an existing validator
    pub fn with_validator(store: S, validator: Arc<Validator>) -> Self {
        Self {
            store,
            validator,
            binder: PropertyBinder::new(),
            observers: ObserverSet::default(),
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validator used for every merge; custom rules can be registered on it
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// Register a merge observer
    pub fn add_observer(&self, observer: Arc<dyn MergeObserver>) {
        self.observers.add(observer);
    }

    /// Merge one envelope into `property` of the entity `entity_id`.
    ///
    /// Error envelopes, transform errors, validation and binding failures
    /// and store errors all abort the merge without writing, fire
    /// `did_fail` and are returned. A `will_merge` error aborts before
    /// anything else happens.
    pub async fn merge_response<T: Bindable>(
        &self,
        envelope: &ResponseEnvelope,
        entity_id: &EntityId,
        property: &Property<S::Entity, T>,
        options: &MergeOptions,
    ) -> Result<(), AiError> {
        let ctx = MergeContext {
            request_id: envelope.request_id(),
            provider_id: envelope.provider_id().to_string(),
            entity_id: entity_id.clone(),
            property: property.name(),
        };

        self.observers.will_merge(&ctx).await?;

        if let Some(err) = envelope.error() {
            tracing::debug!(
                "[Merge] skipping failed response: request={}, entity={}, error={}",
                ctx.request_id,
                entity_id,
                err
            );
            self.observers.did_fail(&ctx, err).await;
            return Err(err.clone());
        }

        let outcome = {
            let _writer = self.writer.lock().await;
            self.write(envelope, entity_id, property, options).await
        };

        match outcome {
            Ok(value) => {
                tracing::debug!(
                    "[Merge] merged: request={}, entity={}, property={}",
                    ctx.request_id,
                    entity_id,
                    ctx.property
                );
                self.observers.did_merge(&ctx, &value).await;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    "[Merge] merge failed: request={}, entity={}, property={}, error={}",
                    ctx.request_id,
                    entity_id,
                    ctx.property,
                    err
                );
                self.observers.did_fail(&ctx, &err).await;
                Err(err)
            }
        }
    }

    /// Merge envelopes into entities pairwise, returning one result per pair
    /// in input order.
    ///
    /// A failed pair never stops the others. If the two slices differ in
    /// length nothing is merged and every position reports the mismatch.
    pub async fn merge_batch<T: Bindable>(
        &self,
        envelopes: &[ResponseEnvelope],
        entity_ids: &[EntityId],
        property: &Property<S::Entity, T>,
        options: &MergeOptions,
    ) -> Vec<Result<(), AiError>> {
        if envelopes.len() != entity_ids.len() {
            let message = format!(
                "{} responses cannot be paired with {} entities",
                envelopes.len(),
                entity_ids.len()
            );
            tracing::warn!("[Merge] batch rejected: {}", message);
            return (0..envelopes.len().max(entity_ids.len()))
                .map(|_| Err(AiError::invalid_request(message.clone())))
                .collect();
        }

        let mut results = Vec::with_capacity(envelopes.len());
        for (envelope, entity_id) in envelopes.iter().zip(entity_ids) {
            results.push(
                self.merge_response(envelope, entity_id, property, options)
                    .await,
            );
        }

        let merged = results.iter().filter(|r| r.is_ok()).count();
        tracing::info!(
            "[Merge] batch finished: total={}, merged={}, failed={}",
            results.len(),
            merged,
            results.len() - merged
        );
        results
    }

    /// Extract a typed value from an envelope without touching the store
    pub fn process_response<T: Bindable>(
        &self,
        envelope: &ResponseEnvelope,
        transform: Option<&Transform>,
    ) -> Result<T, AiError> {
        if let Some(err) = envelope.error() {
            return Err(err.clone());
        }
        let value = self.extract(envelope, transform)?;
        self.binder.convert::<T>(value)
    }

    async fn write<T: Bindable>(
        &self,
        envelope: &ResponseEnvelope,
        entity_id: &EntityId,
        property: &Property<S::Entity, T>,
        options: &MergeOptions,
    ) -> Result<Value, AiError> {
        let mut entity = self
            .store
            .fetch(entity_id)
            .await?
            .ok_or_else(|| AiError::entity_not_found(entity_id.to_string()))?;

        let value = self.extract(envelope, options.transform.as_ref())?;
        self.validator.validate(&value, &options.constraints)?;
        self.binder.bind(value.clone(), &mut entity, property)?;

        self.store.save(entity).await?;
        Ok(value)
    }

    fn extract(
        &self,
        envelope: &ResponseEnvelope,
        transform: Option<&Transform>,
    ) -> Result<Value, AiError> {
        let content = envelope
            .content()
            .cloned()
            .ok_or_else(|| AiError::unexpected_response("response carries no content"))?;

        match transform {
            Some(transform) => transform(content),
            None => Ok(content.into_value()),
        }
    }
}

impl<S: EntityStore + fmt::Debug> fmt::Debug for PersistenceCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("store", &self.store)
            .field("validator", &self.validator)
            .field("observers", &self.observers.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryStore;
    use crate::persistence::store::Entity;
    use crate::types::RequestId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Article {
        id: EntityId,
        title: String,
        words: i64,
    }

    impl Entity for Article {
        fn id(&self) -> &EntityId {
            &self.id
        }
    }

    const TITLE: Property<Article, String> = Property::new("title", |a| &mut a.title);
    const WORDS: Property<Article, i64> = Property::new("words", |a| &mut a.words);

    fn article(id: &str) -> Article {
        Article {
            id: EntityId::new(id),
            title: "untitled".to_string(),
            words: 0,
        }
    }

    fn ok(text: &str) -> ResponseEnvelope {
        ResponseEnvelope::success(RequestId::new(), "mock", Content::text(text))
    }

    fn failed(err: AiError) -> ResponseEnvelope {
        ResponseEnvelope::failure(RequestId::new(), "mock", err)
    }

    async fn title_of(store: &InMemoryStore<Article>, id: &str) -> String {
        store
            .fetch(&EntityId::new(id))
            .await
            .unwrap()
            .unwrap()
            .title
    }

    #[derive(Debug, Default)]
    struct Recorder {
        will: AtomicUsize,
        merged: AtomicUsize,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl MergeObserver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn will_merge(&self, _ctx: &MergeContext) -> Result<(), AiError> {
            self.will.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn did_merge(&self, _ctx: &MergeContext, _value: &Value) -> Result<(), AiError> {
            self.merged.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn did_fail(&self, _ctx: &MergeContext, _error: &AiError) -> Result<(), AiError> {
            self.failed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn coordinator() -> (PersistenceCoordinator<InMemoryStore<Article>>, Arc<Recorder>) {
        let store = InMemoryStore::with_entities([article("a1"), article("a2"), article("a3")]);
        let coordinator = PersistenceCoordinator::new(store);
        let recorder = Arc::new(Recorder::default());
        coordinator.add_observer(recorder.clone());
        (coordinator, recorder)
    }

    #[tokio::test]
    async fn test_merge_text_into_property() {
        let (coordinator, recorder) = coordinator();

        coordinator
            .merge_response(
                &ok("Rust in Action"),
                &EntityId::new("a1"),
                &TITLE,
                &MergeOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(title_of(coordinator.store(), "a1").await, "Rust in Action");
        assert_eq!(recorder.will.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.merged.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_envelope_is_not_written() {
        let (coordinator, recorder) = coordinator();

        let err = coordinator
            .merge_response(
                &failed(AiError::rate_limit("slow down", None)),
                &EntityId::new("a1"),
                &TITLE,
                &MergeOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::RateLimit { .. }));
        assert_eq!(title_of(coordinator.store(), "a1").await, "untitled");
        assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.merged.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_entity_unchanged() {
        let (coordinator, recorder) = coordinator();
        let options = MergeOptions::new().with_constraint("minLength", "5");

        let err = coordinator
            .merge_response(&ok("Hi"), &EntityId::new("a1"), &TITLE, &options)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("minLength"), "{}", err);
        assert_eq!(title_of(coordinator.store(), "a1").await, "untitled");
        assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_rule_is_applied() {
        let (coordinator, _) = coordinator();
        coordinator.validator().register_rule(
            "no_shouting",
            |value: &Value| Ok(value.as_str().map_or(true, |s| s != s.to_uppercase())),
            "title must not be all caps",
        );

        let err = coordinator
            .merge_response(&ok("LOUD"), &EntityId::new("a2"), &TITLE, &MergeOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Validation(_)));

        coordinator
            .merge_response(&ok("Quiet"), &EntityId::new("a2"), &TITLE, &MergeOptions::new())
            .await
            .unwrap();
        assert_eq!(title_of(coordinator.store(), "a2").await, "Quiet");
    }

    #[tokio::test]
    async fn test_binding_failure_leaves_entity_unchanged() {
        let (coordinator, _) = coordinator();

        let err = coordinator
            .merge_response(&ok("many"), &EntityId::new("a1"), &WORDS, &MergeOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::Binding { .. }));
        let stored = coordinator.store().fetch(&EntityId::new("a1")).await.unwrap().unwrap();
        assert_eq!(stored, article("a1"));
    }

    #[tokio::test]
    async fn test_transform_feeds_the_binder() {
        let (coordinator, _) = coordinator();
        let options = MergeOptions::new()
            .with_transform(|content| {
                let text = content
                    .as_text()
                    .ok_or_else(|| AiError::unexpected_response("expected text"))?;
                Ok(Value::Int64(text.split_whitespace().count() as i64))
            })
            .with_constraint("minValue", "1");

        coordinator
            .merge_response(&ok("one two three"), &EntityId::new("a3"), &WORDS, &options)
            .await
            .unwrap();

        let stored = coordinator.store().fetch(&EntityId::new("a3")).await.unwrap().unwrap();
        assert_eq!(stored.words, 3);
    }

    #[tokio::test]
    async fn test_transform_error_aborts() {
        let (coordinator, recorder) = coordinator();
        let options =
            MergeOptions::new().with_transform(|_| Err(AiError::unexpected_response("bad shape")));

        let err = coordinator
            .merge_response(&ok("x"), &EntityId::new("a1"), &TITLE, &options)
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::UnexpectedResponse(_)));
        assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_entity() {
        let (coordinator, _) = coordinator();
        let err = coordinator
            .merge_response(&ok("x"), &EntityId::new("nope"), &TITLE, &MergeOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let (coordinator, _) = coordinator();
        let envelopes = vec![ok("A"), failed(AiError::provider("down")), ok("C")];
        let ids = vec![EntityId::new("a1"), EntityId::new("a2"), EntityId::new("a3")];

        let results = coordinator
            .merge_batch(&envelopes, &ids, &TITLE, &MergeOptions::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(AiError::Provider { .. })));
        assert!(results[2].is_ok());
        assert_eq!(title_of(coordinator.store(), "a1").await, "A");
        assert_eq!(title_of(coordinator.store(), "a2").await, "untitled");
        assert_eq!(title_of(coordinator.store(), "a3").await, "C");
    }

    #[tokio::test]
    async fn test_batch_count_mismatch_fails_everything() {
        let (coordinator, recorder) = coordinator();
        let envelopes = vec![ok("A"), ok("B")];
        let ids = vec![EntityId::new("a1"), EntityId::new("a2"), EntityId::new("a3")];

        let results = coordinator
            .merge_batch(&envelopes, &ids, &TITLE, &MergeOptions::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| matches!(r, Err(AiError::InvalidRequest(_)))));
        assert_eq!(title_of(coordinator.store(), "a1").await, "untitled");
        assert_eq!(recorder.will.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_response_without_store() {
        let (coordinator, _) = coordinator();

        let words: i64 = coordinator.process_response(&ok(" 42 "), None).unwrap();
        assert_eq!(words, 42);

        let flag: bool = coordinator.process_response(&ok("yes"), None).unwrap();
        assert!(flag);

        let err = coordinator
            .process_response::<String>(&failed(AiError::timeout("t")), None)
            .unwrap_err();
        assert!(matches!(err, AiError::Timeout(_)));
    }

    /// Store that counts how many merges are between fetch and save at once
    #[derive(Debug)]
    struct Probe {
        inner: InMemoryStore<Article>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EntityStore for Probe {
        type Entity = Article;

        async fn insert(&self, entity: Article) -> Result<(), AiError> {
            self.inner.insert(entity).await
        }

        async fn fetch(&self, id: &EntityId) -> Result<Option<Article>, AiError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.fetch(id).await
        }

        async fn save(&self, entity: Article) -> Result<(), AiError> {
            tokio::task::yield_now().await;
            let result = self.inner.save(entity).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn delete(&self, id: &EntityId) -> Result<bool, AiError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_never_overlap() {
        let ids: Vec<String> = (0..16).map(|i| format!("a{}", i)).collect();
        let store = Probe {
            inner: InMemoryStore::with_entities(ids.iter().map(|id| article(id))),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let coordinator = Arc::new(PersistenceCoordinator::new(store));

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let coordinator = coordinator.clone();
                let id = EntityId::new(id.as_str());
                tokio::spawn(async move {
                    coordinator
                        .merge_response(&ok("merged"), &id, &TITLE, &MergeOptions::new())
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(coordinator.store().peak.load(Ordering::SeqCst), 1);
        for id in &ids {
            assert_eq!(title_of(&coordinator.store().inner, id).await, "merged");
        }
    }
}
