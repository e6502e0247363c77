//! # Conflux Core
//!
//! Core abstractions and runtime for generating content with AI providers
//! and merging it into persisted entities.
//!
//! This crate provides the provider and layer traits, the request manager
//! that tracks calls through their lifecycle, the response cache, the
//! content validator and property binder, and the single-writer
//! persistence coordinator that ties them together.

pub mod binder;
pub mod cache;
pub mod error;
pub mod layer;
pub mod persistence;
pub mod provider;
pub mod request;
pub mod runtime;
pub mod types;
pub mod validation;
pub mod value;

// Re-exports
pub use binder::{Bindable, Property, PropertyBinder};
pub use cache::{CacheConfig, CacheStatistics, ResponseCache};
pub use error::{AiError, ErrorCategory};
pub use layer::{Layer, LayeredProvider};
pub use persistence::{
    Entity, EntityId, EntityStore, InMemoryStore, MergeContext, MergeObserver, MergeOptions,
    PersistenceCoordinator,
};
pub use provider::Provider;
pub use request::{
    ManagerConfig, RequestManager, RequestStatistics, RequestStatus, StatusEvent, StatusKind,
};
pub use runtime::{Pipeline, PipelineBuilder};
pub use types::*;
pub use validation::{Constraints, ValidationError, ValidationRule, Validator};
pub use value::{Value, ValueType};

/// Result type alias for AI operations
pub type Result<T> = std::result::Result<T, AiError>;
