//! Provider trait and core abstractions.

use crate::error::AiError;
use crate::types::*;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Core provider trait for AI services.
///
/// A provider turns a prompt plus parameters into generated content. It is
/// invoked from spawned tasks, so implementations must be `Send + Sync` and
/// must not hand back anything that aliases their own mutable state.
/// Timeouts are the provider's business; the runtime only classifies the
/// error it reports.
#[async_trait]
pub trait Provider: Send + Sync + Debug + 'static {
    /// Get provider information
    fn info(&self) -> Arc<ProviderInfo>;

    /// Generate content for a prompt
    async fn generate(&self, prompt: &str, parameters: &Parameters)
        -> Result<Generation, AiError>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn info(&self) -> Arc<ProviderInfo> {
        (**self).info()
    }

    async fn generate(
        &self,
        prompt: &str,
        parameters: &Parameters,
    ) -> Result<Generation, AiError> {
        (**self).generate(prompt, parameters).await
    }
}
