//! Merging generated content into persisted entities.

mod coordinator;
mod memory;
mod observer;
mod store;

pub use coordinator::{MergeOptions, PersistenceCoordinator, Transform};
pub use memory::InMemoryStore;
pub use observer::{MergeContext, MergeObserver, ObserverSet};
pub use store::{Entity, EntityId, EntityStore};
