//! Error types for Conflux operations.

use crate::validation::ValidationError;
use std::time::Duration;

/// Broad classification of an [`AiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing credentials or invalid setup
    Configuration,
    /// Transport-level failures
    Network,
    /// Errors reported by the provider service
    Provider,
    /// Validation, shape and conversion failures
    Data,
    /// Persistence and lookup failures
    Storage,
    /// Operation not implemented for this provider or path
    Unsupported,
    /// Cooperative cancellation
    Cancelled,
}

/// The main error type for Conflux operations.
///
/// Errors are cloneable so they can be stored inside request status values
/// and response envelopes that are shared between tasks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AiError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing or unreadable credentials
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Timeout errors
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit errors
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-specific errors
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        code: Option<String>,
    },

    /// Content failed validation
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The provider answered with something of the wrong shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A value could not be converted into the target property type
    #[error("Cannot bind {from} to property of type {to}: {reason}")]
    Binding {
        from: String,
        to: String,
        reason: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store rejected a write or read
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Target entity does not exist in the store
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Request id is not tracked by the manager
    #[error("Request not found: {0}")]
    RequestNotFound(String),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The request was cancelled before it finished
    #[error("Request cancelled")]
    Cancelled,

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl AiError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a missing credentials error
    pub fn missing_credentials(msg: impl Into<String>) -> Self {
        Self::MissingCredentials(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a connection error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limit(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: msg.into(),
            retry_after,
        }
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
            code: None,
        }
    }

    /// Create a provider error carrying the vendor's error code
    pub fn provider_with_code(msg: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
            code: Some(code.into()),
        }
    }

    /// Create an unexpected response error
    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    /// Create a binding error naming the source and target types
    pub fn binding(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Binding {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an entity not found error
    pub fn entity_not_found(id: impl Into<String>) -> Self {
        Self::EntityNotFound(id.into())
    }

    /// Create a request not found error
    pub fn request_not_found(id: impl Into<String>) -> Self {
        Self::RequestNotFound(id.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            AiError::Configuration(_) | AiError::MissingCredentials(_) => {
                ErrorCategory::Configuration
            }
            AiError::Timeout(_) | AiError::ConnectionFailed(_) | AiError::Network(_) => {
                ErrorCategory::Network
            }
            AiError::RateLimit { .. }
            | AiError::Authentication(_)
            | AiError::InvalidRequest(_)
            | AiError::Provider { .. }
            | AiError::Other(_) => ErrorCategory::Provider,
            AiError::Validation(_)
            | AiError::UnexpectedResponse(_)
            | AiError::Binding { .. }
            | AiError::Serialization(_) => ErrorCategory::Data,
            AiError::Persistence(_) | AiError::EntityNotFound(_) | AiError::RequestNotFound(_) => {
                ErrorCategory::Storage
            }
            AiError::Unsupported(_) => ErrorCategory::Unsupported,
            AiError::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::Timeout(_)
                | AiError::ConnectionFailed(_)
                | AiError::Network(_)
                | AiError::RateLimit { .. }
        )
    }

    /// Whether the caller can recover without changing input or setup.
    ///
    /// Only transport errors and rate limits qualify.
    pub fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }

    /// Suggested delay before retrying, for recoverable errors
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            AiError::Timeout(_) => Some(Duration::from_secs(5)),
            AiError::ConnectionFailed(_) => Some(Duration::from_secs(10)),
            AiError::Network(_) => Some(Duration::from_secs(3)),
            AiError::RateLimit { retry_after, .. } => {
                Some(retry_after.unwrap_or(Duration::from_secs(60)))
            }
            _ => None,
        }
    }

    /// Human-readable hint describing how to recover, if there is one
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            AiError::MissingCredentials(_) | AiError::Authentication(_) => {
                Some("Check the API key in settings.".to_string())
            }
            AiError::Configuration(_) => Some("Review the provider configuration.".to_string()),
            AiError::Timeout(_) | AiError::ConnectionFailed(_) | AiError::Network(_) => {
                self.retry_delay().map(|d| {
                    format!(
                        "Check the network connection and retry after {} seconds.",
                        d.as_secs()
                    )
                })
            }
            AiError::RateLimit { .. } => self
                .retry_delay()
                .map(|d| format!("Retry after {} seconds.", d.as_secs())),
            AiError::InvalidRequest(_) => Some("Adjust the prompt or parameters.".to_string()),
            AiError::Validation(_) | AiError::Binding { .. } => {
                Some("Adjust the content constraints or the target property type.".to_string())
            }
            AiError::EntityNotFound(_) => {
                Some("Make sure the entity is inserted before merging into it.".to_string())
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            Self::UnexpectedResponse(err.to_string())
        } else {
            match err.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => Self::Authentication(err.to_string()),
                Some(429) => Self::rate_limit(err.to_string(), None),
                Some(400) | Some(422) => Self::InvalidRequest(err.to_string()),
                Some(code) if code >= 500 => {
                    Self::provider_with_code(err.to_string(), code.to_string())
                }
                _ => Self::Network(err.to_string()),
            }
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<String> for AiError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for AiError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            AiError::missing_credentials("openai").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(AiError::timeout("30s").category(), ErrorCategory::Network);
        assert_eq!(
            AiError::rate_limit("slow down", None).category(),
            ErrorCategory::Provider
        );
        assert_eq!(
            AiError::binding("Array", "String", "no conversion").category(),
            ErrorCategory::Data
        );
        assert_eq!(
            AiError::entity_not_found("note-1").category(),
            ErrorCategory::Storage
        );
        assert_eq!(AiError::Cancelled.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_retry_delays() {
        assert_eq!(
            AiError::timeout("t").retry_delay(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            AiError::rate_limit("r", Some(Duration::from_secs(12))).retry_delay(),
            Some(Duration::from_secs(12))
        );
        assert!(AiError::authentication("bad key").retry_delay().is_none());
        assert!(!AiError::invalid_request("bad").is_recoverable());
        assert!(AiError::network("reset").is_recoverable());
    }

    #[test]
    fn test_recovery_suggestions() {
        let suggestion = AiError::rate_limit("r", Some(Duration::from_secs(7)))
            .recovery_suggestion()
            .unwrap();
        assert!(suggestion.contains("7 seconds"));

        let suggestion = AiError::authentication("401").recovery_suggestion().unwrap();
        assert!(suggestion.contains("API key"));

        assert!(AiError::unsupported("audio").recovery_suggestion().is_none());
    }

    #[test]
    fn test_binding_message_names_both_types() {
        let err = AiError::binding("Array", "String", "no conversion");
        let msg = err.to_string();
        assert!(msg.contains("Array"));
        assert!(msg.contains("String"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = client
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();

        let err = AiError::from(err);
        assert!(matches!(err, AiError::ConnectionFailed(_)), "{:?}", err);
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_url_is_a_network_error() {
        let err = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err();

        assert!(matches!(AiError::from(err), AiError::Network(_)));
    }
}
