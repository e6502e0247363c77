//! # Conflux
//!
//! Generate content with AI providers and merge it safely into your data.
//!
//! Conflux sits between provider calls and a persistent store. Provider
//! calls run concurrently on their own tasks and are tracked through a
//! status state machine. Results are cached, validated against declarative
//! constraints, converted to the target property's type and written by a
//! single writer.
//!
//! ## Features
//!
//! - **Request tracking**: per-request status streams, cancellation, batches
//! - **Response cache**: bounded, TTL-based, invalidation by provider or prompt
//! - **Validation**: built-in constraints plus custom rules
//! - **Property binding**: typed accessors with a fixed coercion matrix
//! - **Single-writer persistence**: merge hooks, batch merges, no partial writes
//! - **Composable layers**: wrap providers with logging and your own middleware
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! conflux = { version = "0.1", features = ["layers"] }
//! ```
//!
//! ```ignore
//! use conflux::prelude::*;
//! use conflux::layer::LoggingLayer;
//!
//! const SUMMARY: Property<Article, String> = Property::new("summary", |a| &mut a.summary);
//!
//! # async fn example(provider: impl Provider, store: InMemoryStore<Article>) -> Result<()> {
//! let pipeline = Pipeline::builder(provider)
//!     .layer(LoggingLayer::new())
//!     .finish(store);
//!
//! let options = MergeOptions::new().with_constraint("maxLength", "280");
//! pipeline
//!     .generate_and_merge(
//!         "Summarize ...",
//!         Parameters::new(),
//!         &"article-1".into(),
//!         &SUMMARY,
//!         &options,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Includes `layers`
//! - `layers`: Built-in provider layers (logging)
//! - `schema`: JSON Schema derives for public payload types
//! - `full`: All features enabled

// Re-export core types and traits
pub use conflux_core::*;

// Re-export layers under `layer` module
#[cfg(feature = "conflux-layer")]
pub mod layer {
    //! Built-in provider layers.
    pub use conflux_core::layer::*;
    pub use conflux_layer::*;
}

// Re-export schemars when schema feature is enabled
#[cfg(feature = "schema")]
pub mod schemars {
    pub use ::schemars::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude module containing the most commonly used types and traits.
    //!
    //! ```
    //! use conflux::prelude::*;
    //! ```

    pub use crate::{
        AiError, CacheConfig, Content, Entity, EntityId, EntityStore, Generation, InMemoryStore,
        Layer, ManagerConfig, MergeObserver, MergeOptions, Parameters, Pipeline, Property,
        Provider, ProviderInfo, Request, RequestStatus, ResponseEnvelope, Result, Value,
    };

    #[cfg(feature = "conflux-layer")]
    pub use crate::layer::LoggingLayer;
}
