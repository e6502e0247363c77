//! # Conflux Layers
//!
//! Built-in layers for Conflux providers.
//!
//! Currently implemented layers:
//! - `LoggingLayer`: Logs every generation with timing information
//!
//! ## Usage
//!
//! ```ignore
//! use conflux_core::{InMemoryStore, Pipeline};
//! use conflux_layer::LoggingLayer;
//!
//! let pipeline = Pipeline::builder(provider)
//!     .layer(LoggingLayer::with_prefix("[Drafts]"))
//!     .finish(InMemoryStore::new());
//! ```

pub mod logging;

// Re-exports
pub use logging::{LoggingLayer, LoggingProvider};
