//! Logging layer for provider operations.

use async_trait::async_trait;
use conflux_core::error::AiError;
use conflux_core::layer::{Layer, LayeredProvider};
use conflux_core::provider::Provider;
use conflux_core::types::*;
use std::sync::Arc;

/// Logging layer that logs provider operations.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    prefix: String,
}

impl LoggingLayer {
    /// Create a new logging layer
    pub fn new() -> Self {
        Self {
            prefix: "[Conflux]".to_string(),
        }
    }

    /// Create a logging layer with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Provider> Layer<P> for LoggingLayer {
    type LayeredProvider = LoggingProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        LoggingProvider {
            inner,
            prefix: self.prefix.clone(),
        }
    }
}

/// Provider wrapped with logging
#[derive(Debug)]
pub struct LoggingProvider<P> {
    inner: P,
    prefix: String,
}

#[async_trait]
impl<P: Provider> LayeredProvider for LoggingProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_generate(
        &self,
        prompt: &str,
        parameters: &Parameters,
    ) -> Result<Generation, AiError> {
        let provider_id = self.inner.info().id.clone();
        tracing::debug!(
            "{} generate request: provider={}, prompt_chars={}, parameters={}",
            self.prefix,
            provider_id,
            prompt.chars().count(),
            parameters.len()
        );

        let start = std::time::Instant::now();
        let result = self.inner.generate(prompt, parameters).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(generation) => {
                tracing::debug!(
                    "{} generate success: provider={}, content={}, tokens={:?}, elapsed={:?}",
                    self.prefix,
                    provider_id,
                    generation.content.kind(),
                    generation.usage.as_ref().and_then(|u| u.total_tokens),
                    elapsed
                );
            }
            Err(e) => {
                tracing::error!(
                    "{} generate error: provider={}, category={:?}, error={}, elapsed={:?}",
                    self.prefix,
                    provider_id,
                    e.category(),
                    e,
                    elapsed
                );
            }
        }

        result
    }
}

#[async_trait]
impl<P: Provider> Provider for LoggingProvider<P> {
    fn info(&self) -> Arc<ProviderInfo> {
        LayeredProvider::layered_info(self)
    }

    async fn generate(
        &self,
        prompt: &str,
        parameters: &Parameters,
    ) -> Result<Generation, AiError> {
        LayeredProvider::layered_generate(self, prompt, parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for Scripted {
        fn info(&self) -> Arc<ProviderInfo> {
            Arc::new(ProviderInfo::new("scripted", "Scripted"))
        }

        async fn generate(
            &self,
            prompt: &str,
            _parameters: &Parameters,
        ) -> Result<Generation, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.is_empty() {
                return Err(AiError::invalid_request("empty prompt"));
            }
            Ok(Generation::new(Content::text(prompt.to_uppercase()))
                .with_usage(Usage::tokens(3, 4)))
        }
    }

    #[tokio::test]
    async fn test_logging_layer_passes_results_through() {
        let provider = LoggingLayer::new().layer(Scripted::default());

        let generation = provider.generate("hello", &Parameters::new()).await.unwrap();
        assert_eq!(generation.content.as_text(), Some("HELLO"));
        assert_eq!(generation.usage.and_then(|u| u.total_tokens), Some(7));
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logging_layer_passes_errors_through() {
        let provider = LoggingLayer::with_prefix("[Test]").layer(Scripted::default());

        let err = provider.generate("", &Parameters::new()).await.unwrap_err();
        assert!(matches!(err, AiError::InvalidRequest(_)));
    }

    #[test]
    fn test_info_is_forwarded() {
        let provider = LoggingLayer::new().layer(Scripted::default());
        assert_eq!(provider.info().id, "scripted");
    }
}
