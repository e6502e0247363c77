//! Core types: requests, content payloads and response envelopes.

use crate::error::AiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Loosely typed value used in parameter maps and structured payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum RecursiveValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<RecursiveValue>),
    Map(BTreeMap<String, RecursiveValue>),
}

impl RecursiveValue {
    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            RecursiveValue::Null => "null",
            RecursiveValue::Bool(_) => "bool",
            RecursiveValue::Int(_) => "int",
            RecursiveValue::Double(_) => "double",
            RecursiveValue::String(_) => "string",
            RecursiveValue::Array(_) => "array",
            RecursiveValue::Map(_) => "map",
        }
    }

    /// Borrow the inner string, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RecursiveValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for RecursiveValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RecursiveValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for RecursiveValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for RecursiveValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for RecursiveValue {
    fn from(i: i32) -> Self {
        Self::Int(i as i64)
    }
}

impl From<f64> for RecursiveValue {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl<T: Into<RecursiveValue>> From<Vec<T>> for RecursiveValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Request parameters, kept sorted so that equal maps compare and hash equally
pub type Parameters = BTreeMap<String, RecursiveValue>;

/// Audio encodings a provider may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Opus,
    Aac,
    Flac,
    Pcm,
}

/// Image encodings a provider may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

/// Discriminant of [`Content`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Data,
    Audio,
    Image,
    Structured,
    Embedding,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentKind::Text => "text",
            ContentKind::Data => "data",
            ContentKind::Audio => "audio",
            ContentKind::Image => "image",
            ContentKind::Structured => "structured",
            ContentKind::Embedding => "embedding",
        };
        f.write_str(name)
    }
}

/// Generated payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Data(Vec<u8>),
    Audio {
        data: Vec<u8>,
        format: AudioFormat,
    },
    Image {
        data: Vec<u8>,
        format: ImageFormat,
    },
    Structured(BTreeMap<String, RecursiveValue>),
    Embedding {
        vector: Vec<f32>,
        dimensions: usize,
    },
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create an embedding, deriving the dimension count from the vector
    pub fn embedding(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self::Embedding { vector, dimensions }
    }

    /// Get the payload kind
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Text(_) => ContentKind::Text,
            Content::Data(_) => ContentKind::Data,
            Content::Audio { .. } => ContentKind::Audio,
            Content::Image { .. } => ContentKind::Image,
            Content::Structured(_) => ContentKind::Structured,
            Content::Embedding { .. } => ContentKind::Embedding,
        }
    }

    /// Borrow the text, if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Token and byte counts reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl Usage {
    /// Usage expressed in tokens
    pub fn tokens(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens.saturating_add(completion_tokens)),
            bytes: None,
        }
    }

    /// Usage expressed in bytes, for binary payloads
    pub fn bytes(bytes: u64) -> Self {
        Self {
            bytes: Some(bytes),
            ..Self::default()
        }
    }
}

/// Provider information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

impl ProviderInfo {
    /// Create provider information
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What a provider hands back from a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: Content,
    pub usage: Option<Usage>,
    pub metadata: BTreeMap<String, String>,
}

impl Generation {
    /// Create a generation with no usage or metadata
    pub fn new(content: Content) -> Self {
        Self {
            content,
            usage: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach usage statistics
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<Content> for Generation {
    fn from(content: Content) -> Self {
        Self::new(content)
    }
}

/// Unique request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub provider_id: String,
    pub prompt: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Request {
    /// Create a new request with a fresh id
    pub fn new(provider_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            provider_id: provider_id.into(),
            prompt: prompt.into(),
            parameters: Parameters::new(),
        }
    }

    /// Set a single parameter
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<RecursiveValue>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace all parameters
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Immutable outcome of one provider call.
///
/// Built once by whoever ran the call; the builder methods consume `self`,
/// so an envelope cannot change after it has been handed out.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    request_id: RequestId,
    provider_id: String,
    result: Result<Content, AiError>,
    metadata: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    usage: Option<Usage>,
}

impl ResponseEnvelope {
    /// Create a successful envelope
    pub fn success(
        request_id: RequestId,
        provider_id: impl Into<String>,
        content: Content,
    ) -> Self {
        Self::new(request_id, provider_id, Ok(content))
    }

    /// Create a failed envelope
    pub fn failure(request_id: RequestId, provider_id: impl Into<String>, error: AiError) -> Self {
        Self::new(request_id, provider_id, Err(error))
    }

    /// Create an envelope from a provider outcome, carrying over usage and metadata
    pub fn from_generation(request: &Request, outcome: Result<Generation, AiError>) -> Self {
        match outcome {
            Ok(generation) => Self {
                usage: generation.usage,
                metadata: generation.metadata,
                ..Self::success(request.id, request.provider_id.clone(), generation.content)
            },
            Err(err) => Self::failure(request.id, request.provider_id.clone(), err),
        }
    }

    fn new(
        request_id: RequestId,
        provider_id: impl Into<String>,
        result: Result<Content, AiError>,
    ) -> Self {
        Self {
            request_id,
            provider_id: provider_id.into(),
            result,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            usage: None,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach usage statistics
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn result(&self) -> &Result<Content, AiError> {
        &self.result
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Whether the provider call succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Borrow the content, if the call succeeded
    pub fn content(&self) -> Option<&Content> {
        self.result.as_ref().ok()
    }

    /// Borrow the error, if the call failed
    pub fn error(&self) -> Option<&AiError> {
        self.result.as_ref().err()
    }

    /// Consume the envelope, yielding the content or the recorded error
    pub fn into_result(self) -> Result<Content, AiError> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursive_value_untagged_round_trip() {
        let json = serde_json::json!({
            "temperature": 0.7,
            "max_tokens": 256,
            "stop": ["\n", null],
            "nested": {"flag": true}
        });

        let params: Parameters = serde_json::from_value(json).unwrap();
        assert_eq!(params["temperature"], RecursiveValue::Double(0.7));
        assert_eq!(params["max_tokens"], RecursiveValue::Int(256));
        assert_eq!(
            params["stop"],
            RecursiveValue::Array(vec!["\n".into(), RecursiveValue::Null])
        );
        assert_eq!(params["nested"].type_name(), "map");
    }

    #[test]
    fn test_content_serialization_is_tagged() {
        let content = Content::Audio {
            data: vec![1, 2],
            format: AudioFormat::Mp3,
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["value"]["format"], "mp3");

        let text: Content = serde_json::from_value(serde_json::json!({
            "type": "text",
            "value": "hello"
        }))
        .unwrap();
        assert_eq!(text.as_text(), Some("hello"));
    }

    #[test]
    fn test_usage_total_saturates() {
        assert_eq!(Usage::tokens(3, 4).total_tokens, Some(7));
        assert_eq!(Usage::tokens(u32::MAX, 1).total_tokens, Some(u32::MAX));
    }

    #[test]
    fn test_embedding_dimensions() {
        let content = Content::embedding(vec![0.1, 0.2, 0.3]);
        assert_eq!(content.kind(), ContentKind::Embedding);
        match content {
            Content::Embedding { dimensions, .. } => assert_eq!(dimensions, 3),
            _ => panic!("Expected embedding"),
        }
    }

    #[test]
    fn test_envelope_from_generation() {
        let request = Request::new("mock", "hello").with_parameter("temperature", 0.2);
        let generation = Generation::new(Content::text("hi"))
            .with_usage(Usage::tokens(3, 1))
            .with_metadata("model", "mock-1");

        let envelope = ResponseEnvelope::from_generation(&request, Ok(generation));
        assert!(envelope.is_success());
        assert_eq!(envelope.request_id(), request.id);
        assert_eq!(envelope.provider_id(), "mock");
        assert_eq!(envelope.usage().and_then(|u| u.total_tokens), Some(4));
        assert_eq!(envelope.metadata().get("model").map(String::as_str), Some("mock-1"));

        let failed = ResponseEnvelope::from_generation(&request, Err(AiError::provider("boom")));
        assert!(!failed.is_success());
        assert!(failed.content().is_none());
        assert!(matches!(failed.error(), Some(AiError::Provider { .. })));
    }
}
