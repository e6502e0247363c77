//! Layer trait and abstractions.
//!
//! Layers wrap providers with cross-cutting concerns such as logging. Each
//! layer takes an inner provider and returns a new provider.

use crate::error::AiError;
use crate::provider::Provider;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Layer trait for wrapping providers.
pub trait Layer<P: Provider> {
    /// The type of the layered provider
    type LayeredProvider: Provider;

    /// Wrap the inner provider with this layer
    fn layer(&self, inner: P) -> Self::LayeredProvider;
}

/// Helper trait for layered providers.
///
/// Provides forwarding implementations for provider methods. Implementers
/// only override the methods they want to intercept.
#[async_trait]
pub trait LayeredProvider: Sized + Provider {
    /// The inner provider type
    type Inner: Provider;

    /// Get a reference to the inner provider
    fn inner(&self) -> &Self::Inner;

    /// Default implementation for info - forwards to inner
    fn layered_info(&self) -> Arc<ProviderInfo> {
        self.inner().info()
    }

    /// Default implementation for generate - forwards to inner
    async fn layered_generate(
        &self,
        prompt: &str,
        parameters: &Parameters,
    ) -> Result<Generation, AiError> {
        self.inner().generate(prompt, parameters).await
    }
}

/// Macro to implement Provider trait by forwarding to LayeredProvider methods.
#[macro_export]
macro_rules! impl_layered_provider {
    ($type:ty) => {
        #[async_trait::async_trait]
        impl $crate::provider::Provider for $type {
            fn info(&self) -> std::sync::Arc<$crate::types::ProviderInfo> {
                $crate::layer::LayeredProvider::layered_info(self)
            }

            async fn generate(
                &self,
                prompt: &str,
                parameters: &$crate::types::Parameters,
            ) -> Result<$crate::types::Generation, $crate::error::AiError> {
                $crate::layer::LayeredProvider::layered_generate(self, prompt, parameters).await
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn info(&self) -> Arc<ProviderInfo> {
            Arc::new(ProviderInfo::new("echo", "Echo"))
        }

        async fn generate(
            &self,
            prompt: &str,
            _parameters: &Parameters,
        ) -> Result<Generation, AiError> {
            Ok(Generation::new(Content::text(prompt)))
        }
    }

    #[derive(Debug)]
    struct Shouting {
        inner: Echo,
    }

    #[async_trait]
    impl LayeredProvider for Shouting {
        type Inner = Echo;

        fn inner(&self) -> &Self::Inner {
            &self.inner
        }

        async fn layered_generate(
            &self,
            prompt: &str,
            parameters: &Parameters,
        ) -> Result<Generation, AiError> {
            self.inner.generate(&prompt.to_uppercase(), parameters).await
        }
    }

    crate::impl_layered_provider!(Shouting);

    struct ShoutingLayer;

    impl Layer<Echo> for ShoutingLayer {
        type LayeredProvider = Shouting;

        fn layer(&self, inner: Echo) -> Self::LayeredProvider {
            Shouting { inner }
        }
    }

    #[tokio::test]
    async fn test_layer_intercepts_generate_and_forwards_info() {
        let provider = ShoutingLayer.layer(Echo);
        assert_eq!(provider.info().id, "echo");

        let generation = provider.generate("hello", &Parameters::new()).await.unwrap();
        assert_eq!(generation.content.as_text(), Some("HELLO"));
    }
}
