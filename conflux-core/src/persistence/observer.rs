//! Merge lifecycle hooks.

use super::store::EntityId;
use crate::error::AiError;
use crate::types::RequestId;
use crate::value::Value;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// What a merge is about to touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeContext {
    pub request_id: RequestId,
    pub provider_id: String,
    pub entity_id: EntityId,
    pub property: &'static str,
}

/// Observer of merge lifecycle events.
///
/// All hooks default to no-ops. Hooks of different observers run
/// concurrently.
#[async_trait]
pub trait MergeObserver: Send + Sync + Debug + 'static {
    /// Observer name
    fn name(&self) -> &str;

    /// Called before anything is read; an error aborts the merge
    async fn will_merge(&self, _ctx: &MergeContext) -> Result<(), AiError> {
        Ok(())
    }

    /// Called after the entity was committed with `value`
    async fn did_merge(&self, _ctx: &MergeContext, _value: &Value) -> Result<(), AiError> {
        Ok(())
    }

    /// Called when the merge failed and nothing was written
    async fn did_fail(&self, _ctx: &MergeContext, _error: &AiError) -> Result<(), AiError> {
        Ok(())
    }
}

/// Registered merge observers.
///
/// Registration swaps the whole list, so a merge in progress keeps the
/// snapshot it started with.
#[derive(Debug, Default)]
pub struct ObserverSet {
    observers: ArcSwap<Vec<Arc<dyn MergeObserver>>>,
}

impl ObserverSet {
    /// Create a set from observers
    pub fn new(observers: Vec<Arc<dyn MergeObserver>>) -> Self {
        Self {
            observers: ArcSwap::from_pointee(observers),
        }
    }

    /// Register an observer
    pub fn add(&self, observer: Arc<dyn MergeObserver>) {
        self.observers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(observer.clone());
            next
        });
    }

    /// Remove every observer with `name`, returning whether any was removed
    pub fn remove(&self, name: &str) -> bool {
        let previous = self.observers.rcu(|current| {
            current
                .iter()
                .filter(|observer| observer.name() != name)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|observer| observer.name() == name)
    }

    /// Names of the registered observers, in registration order
    pub fn names(&self) -> Vec<String> {
        self.observers
            .load()
            .iter()
            .map(|observer| observer.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.observers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.load().is_empty()
    }

    /// Run will_merge hooks in parallel, failing on the first error
    pub async fn will_merge(&self, ctx: &MergeContext) -> Result<(), AiError> {
        use futures::future::try_join_all;

        let observers = self.observers.load_full();
        let futures = observers
            .iter()
            .map(|o| o.will_merge(ctx))
            .collect::<Vec<_>>();

        try_join_all(futures).await?;
        Ok(())
    }

    /// Run did_merge hooks in parallel; errors are logged
    pub async fn did_merge(&self, ctx: &MergeContext, value: &Value) {
        use futures::future::join_all;

        let observers = self.observers.load_full();
        let futures = observers
            .iter()
            .map(|o| async move { (o.name().to_string(), o.did_merge(ctx, value).await) })
            .collect::<Vec<_>>();

        for (name, result) in join_all(futures).await {
            if let Err(err) = result {
                tracing::warn!(
                    "[Merge] did_merge hook failed: observer={}, entity={}, error={}",
                    name,
                    ctx.entity_id,
                    err
                );
            }
        }
    }

    /// Run did_fail hooks in parallel; errors are logged
    pub async fn did_fail(&self, ctx: &MergeContext, error: &AiError) {
        use futures::future::join_all;

        let observers = self.observers.load_full();
        let futures = observers
            .iter()
            .map(|o| async move { (o.name().to_string(), o.did_fail(ctx, error).await) })
            .collect::<Vec<_>>();

        for (name, result) in join_all(futures).await {
            if let Err(err) = result {
                tracing::warn!(
                    "[Merge] did_fail hook failed: observer={}, entity={}, error={}",
                    name,
                    ctx.entity_id,
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counting {
        name: &'static str,
        will: AtomicUsize,
        done: AtomicUsize,
        veto: bool,
    }

    #[async_trait]
    impl MergeObserver for Counting {
        fn name(&self) -> &str {
            self.name
        }

        async fn will_merge(&self, _ctx: &MergeContext) -> Result<(), AiError> {
            self.will.fetch_add(1, Ordering::SeqCst);
            if self.veto {
                return Err(AiError::invalid_request("vetoed"));
            }
            Ok(())
        }

        async fn did_merge(&self, _ctx: &MergeContext, _value: &Value) -> Result<(), AiError> {
            self.done.fetch_add(1, Ordering::SeqCst);
            Err(AiError::other("ignored"))
        }
    }

    fn ctx() -> MergeContext {
        MergeContext {
            request_id: RequestId::new(),
            provider_id: "mock".to_string(),
            entity_id: EntityId::new("e1"),
            property: "title",
        }
    }

    #[tokio::test]
    async fn test_all_observers_are_called() {
        let a = Arc::new(Counting {
            name: "a",
            ..Default::default()
        });
        let b = Arc::new(Counting {
            name: "b",
            ..Default::default()
        });
        let set = ObserverSet::new(vec![a.clone() as Arc<dyn MergeObserver>, b.clone()]);

        set.will_merge(&ctx()).await.unwrap();
        set.did_merge(&ctx(), &Value::from("x")).await;

        assert_eq!(a.will.load(Ordering::SeqCst), 1);
        assert_eq!(b.will.load(Ordering::SeqCst), 1);
        assert_eq!(a.done.load(Ordering::SeqCst), 1);
        assert_eq!(b.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_will_merge_error_propagates() {
        let set = ObserverSet::default();
        set.add(Arc::new(Counting {
            name: "veto",
            veto: true,
            ..Default::default()
        }));

        assert!(set.will_merge(&ctx()).await.is_err());
    }

    #[test]
    fn test_add_and_remove() {
        let set = ObserverSet::default();
        assert!(set.is_empty());
        set.add(Arc::new(Counting {
            name: "a",
            ..Default::default()
        }));
        set.add(Arc::new(Counting {
            name: "b",
            ..Default::default()
        }));
        assert_eq!(set.names(), vec!["a", "b"]);

        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert_eq!(set.len(), 1);
    }
}
