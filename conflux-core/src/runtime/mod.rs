//! Runtime wiring of providers, cache, request tracking and persistence.

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineBuilder, CACHE_METADATA_KEY};
