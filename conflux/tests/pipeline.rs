use async_trait::async_trait;
use conflux::layer::LoggingLayer;
use conflux::prelude::*;
use conflux::{
    Constraints, MergeContext, PersistenceCoordinator, PropertyBinder, RecursiveValue,
    RequestManager, ResponseCache, StatusKind, Validator,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Article {
    id: EntityId,
    title: String,
    summary: String,
    rating: f64,
}

impl Entity for Article {
    fn id(&self) -> &EntityId {
        &self.id
    }
}

const TITLE: Property<Article, String> = Property::new("title", |a| &mut a.title);
const SUMMARY: Property<Article, String> = Property::new("summary", |a| &mut a.summary);
const RATING: Property<Article, f64> = Property::new("rating", |a| &mut a.rating);

fn article(id: &str) -> Article {
    Article {
        id: EntityId::new(id),
        title: String::new(),
        summary: String::new(),
        rating: 0.0,
    }
}

/// Provider that answers from the prompt and counts its calls.
///
/// Prompts starting with `fail:` produce a provider error.
#[derive(Debug, Default)]
struct ScriptedProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        Arc::new(ProviderInfo::new("scripted", "Scripted Provider"))
    }

    async fn generate(&self, prompt: &str, parameters: &Parameters) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(reason) = prompt.strip_prefix("fail:") {
            return Err(AiError::provider(reason.trim()));
        }
        let text = match parameters.get("suffix").and_then(RecursiveValue::as_str) {
            Some(suffix) => format!("{}{}", prompt, suffix),
            None => prompt.to_string(),
        };
        Ok(Generation::new(Content::text(text)))
    }
}

#[derive(Debug, Default)]
struct Audit {
    merged: AtomicUsize,
    failed: AtomicUsize,
}

#[async_trait]
impl MergeObserver for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    async fn did_merge(&self, _ctx: &MergeContext, _value: &Value) -> Result<()> {
        self.merged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn did_fail(&self, _ctx: &MergeContext, _error: &AiError) -> Result<()> {
        self.failed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

fn text_of(envelope: &ResponseEnvelope) -> Option<&str> {
    envelope.content().and_then(Content::as_text)
}

async fn stored(store: &InMemoryStore<Article>, id: &str) -> Article {
    store.fetch(&EntityId::new(id)).await.unwrap().unwrap()
}

#[tokio::test]
async fn cache_returns_stored_value() {
    let cache = ResponseCache::<String>::new();
    cache.set("hi".to_string(), "p1", "x", &Parameters::new()).await;

    assert_eq!(
        cache.get("p1", "x", &Parameters::new()).await,
        Some("hi".to_string())
    );
}

#[tokio::test]
async fn cache_evicts_oldest_past_capacity() {
    let cache = ResponseCache::with_config(CacheConfig::new().with_max_entries(3));
    for prompt in ["one", "two", "three", "four"] {
        cache.set(prompt.len(), "p1", prompt, &Parameters::new()).await;
    }

    assert_eq!(cache.count().await, 3);
    assert_eq!(cache.get("p1", "one", &Parameters::new()).await, None);
    assert_eq!(cache.get("p1", "four", &Parameters::new()).await, Some(4));
}

#[test]
fn short_text_fails_min_length() {
    let validator = Validator::new();
    let mut constraints = Constraints::new();
    constraints.insert("minLength".to_string(), "5".to_string());

    let err = validator
        .validate(&Value::from("Hi"), &constraints)
        .unwrap_err();
    assert!(err.to_string().contains("minLength"), "{}", err);
}

#[test]
fn binder_follows_the_coercion_matrix() {
    let binder = PropertyBinder::new();
    let mut entity = article("a1");

    let count: i64 = binder.convert(Value::from("42")).unwrap();
    assert_eq!(count, 42);

    binder.bind(Value::from("4.5"), &mut entity, &RATING).unwrap();
    assert_eq!(entity.rating, 4.5);

    let list = Value::Array(vec![1i64.into(), 2i64.into(), 3i64.into()]);
    let err = binder.bind(list, &mut entity, &TITLE).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Array") && message.contains("String"), "{}", message);
    assert_eq!(entity.title, "");
}

#[tokio::test]
async fn cancelled_before_execution_stream_ends_cancelled() {
    let manager = RequestManager::new();
    let id = manager.submit(Request::new("scripted", "never run")).unwrap();
    let stream = manager.status_stream(id).unwrap();

    manager.cancel(id).unwrap();

    let kinds: Vec<StatusKind> = stream.map(|status| status.kind()).collect().await;
    assert_eq!(kinds, vec![StatusKind::Pending, StatusKind::Cancelled]);
}

#[tokio::test]
async fn batch_merge_updates_only_successful_pairs() {
    let store = InMemoryStore::with_entities([article("a1"), article("a2"), article("a3")]);
    let coordinator = PersistenceCoordinator::new(store);

    let envelopes = vec![
        ResponseEnvelope::success(conflux::RequestId::new(), "scripted", Content::text("A")),
        ResponseEnvelope::failure(
            conflux::RequestId::new(),
            "scripted",
            AiError::provider("upstream down"),
        ),
        ResponseEnvelope::success(conflux::RequestId::new(), "scripted", Content::text("C")),
    ];
    let ids = ["a1", "a2", "a3"].map(EntityId::new);

    let results = coordinator
        .merge_batch(&envelopes, &ids, &TITLE, &MergeOptions::new())
        .await;

    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert_eq!(stored(coordinator.store(), "a1").await.title, "A");
    assert_eq!(stored(coordinator.store(), "a2").await.title, "");
    assert_eq!(stored(coordinator.store(), "a3").await.title, "C");
}

#[tokio::test]
async fn identical_generations_hit_the_provider_once() {
    init_tracing();
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = Pipeline::builder(provider.clone())
        .layer(LoggingLayer::new())
        .finish(InMemoryStore::<Article>::new());

    let params: Parameters = [("suffix".to_string(), RecursiveValue::from("!"))]
        .into_iter()
        .collect();

    let first = pipeline.generate("hello", params.clone()).await.unwrap();
    let second = pipeline.generate("hello", params.clone()).await.unwrap();

    assert_eq!(text_of(&first), Some("hello!"));
    assert_eq!(text_of(&first), text_of(&second));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        second.metadata().get("cache").map(String::as_str),
        Some("hit")
    );

    pipeline.generate("hello", Parameters::new()).await.unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.cache().statistics().await.hits, 1);
}

#[tokio::test]
async fn failed_generations_are_not_cached() {
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = Pipeline::builder(provider.clone()).finish(InMemoryStore::<Article>::new());

    let first = pipeline.generate("fail: busy", Parameters::new()).await.unwrap();
    assert!(!first.is_success());
    pipeline.generate("fail: busy", Parameters::new()).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.cache().count().await, 0);
    assert_eq!(pipeline.manager().statistics().failed, 2);
}

#[tokio::test]
async fn generate_and_merge_writes_validated_content() {
    init_tracing();
    let audit = Arc::new(Audit::default());
    let pipeline = Pipeline::builder(ScriptedProvider::default())
        .observer(audit.clone())
        .finish(InMemoryStore::with_entities([article("a1")]));
    let options = MergeOptions::new().with_constraint("maxLength", "20");

    pipeline
        .generate_and_merge("Short summary", Parameters::new(), &"a1".into(), &SUMMARY, &options)
        .await
        .unwrap();
    let err = pipeline
        .generate_and_merge(
            "This summary is far too long to fit",
            Parameters::new(),
            &"a1".into(),
            &SUMMARY,
            &options,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Validation(_)));
    assert_eq!(stored(pipeline.store(), "a1").await.summary, "Short summary");
    assert_eq!(audit.merged.load(Ordering::SeqCst), 1);
    assert_eq!(audit.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn provider_failure_reaches_merge_observers() {
    let audit = Arc::new(Audit::default());
    let pipeline = Pipeline::builder(ScriptedProvider::default())
        .observer(audit.clone())
        .finish(InMemoryStore::with_entities([article("a1")]));

    let err = pipeline
        .generate_and_merge(
            "fail: quota",
            Parameters::new(),
            &"a1".into(),
            &TITLE,
            &MergeOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Provider { .. }));
    assert_eq!(audit.failed.load(Ordering::SeqCst), 1);
    assert_eq!(stored(pipeline.store(), "a1").await, article("a1"));
}

#[tokio::test]
async fn concurrent_merges_land_on_their_entities() {
    let ids: Vec<String> = (0..12).map(|i| format!("a{}", i)).collect();
    let pipeline = Arc::new(
        Pipeline::builder(ScriptedProvider::default())
            .finish(InMemoryStore::with_entities(ids.iter().map(|id| article(id)))),
    );

    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let pipeline = pipeline.clone();
            let id = id.clone();
            tokio::spawn(async move {
                pipeline
                    .generate_and_merge(
                        format!("title for {}", id),
                        Parameters::new(),
                        &EntityId::new(id.as_str()),
                        &TITLE,
                        &MergeOptions::new(),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    for id in &ids {
        assert_eq!(
            stored(pipeline.store(), id).await.title,
            format!("title for {}", id)
        );
    }
    assert_eq!(pipeline.manager().statistics().completed, ids.len());
}

#[tokio::test]
async fn long_running_pipeline_keeps_a_bounded_request_table() {
    let pipeline = Pipeline::builder(ScriptedProvider::default())
        .manager_config(ManagerConfig::new().with_max_finished(Some(5)))
        .finish(InMemoryStore::<Article>::new());

    for i in 0..50 {
        let envelope = pipeline
            .generate(format!("prompt {}", i), Parameters::new())
            .await
            .unwrap();
        assert!(envelope.is_success());
    }

    let stats = pipeline.manager().statistics();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.completed, 5);
}

#[tokio::test]
async fn batch_generation_keeps_input_order() {
    let pipeline = Pipeline::builder(ScriptedProvider::default())
        .manager_config(ManagerConfig::new().with_batch_concurrency(2))
        .finish(InMemoryStore::<Article>::new());

    let requests = ["first", "fail: nope", "third"]
        .into_iter()
        .map(|prompt| Request::new("scripted", prompt))
        .collect();
    let results = pipeline.generate_batch(requests).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().ok().and_then(text_of), Some("first"));
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().ok().and_then(text_of), Some("third"));
}

#[tokio::test]
async fn typed_extraction_without_persistence() {
    let pipeline = Pipeline::builder(ScriptedProvider::default())
        .finish(InMemoryStore::<Article>::new());

    let envelope = pipeline.generate("4.25", Parameters::new()).await.unwrap();
    let rating: f64 = pipeline
        .coordinator()
        .process_response(&envelope, None)
        .unwrap();

    assert_eq!(rating, 4.25);
}
