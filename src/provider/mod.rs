//! Embedding provider abstraction
//!
//! A provider turns strings into fixed-dimension vectors under declared
//! limits. Concrete implementations wrap HTTP endpoints (remote
//! OpenAI-compatible or local Ollama-style); selection happens once at
//! construction through the registry, never per call site.

mod http;
mod local;

pub use http::HttpProvider;
pub use local::LocalProvider;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, ConfigError, ProviderConfig, ProviderKind};

/// Limits a provider declares; drive batching and rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub max_tokens_per_request: usize,
    pub max_requests_per_minute: u32,
    pub max_tokens_per_minute: u32,
    pub recommended_batch_size: usize,
    pub embedding_dimensions: usize,
}

/// Provider failures, classified for the retry policy.
///
/// `Transient` is the only retryable class; everything else is
/// permanent and fatal for the current run.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("provider returned {actual}-dimension vectors, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP status. 429 and 5xx retry; 401/403 are auth;
    /// remaining 4xx are permanent rejections.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let summary = format!("{status}: {}", body.chars().take(200).collect::<String>());
        if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::Transient(summary)
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            ProviderError::Auth(summary)
        } else {
            ProviderError::Rejected(summary)
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ProviderError::Transient(e.to_string())
        } else {
            ProviderError::MalformedResponse(e.to_string())
        }
    }
}

/// Result of a provider connectivity check.
#[derive(Debug, Clone)]
pub struct ProviderCheck {
    pub ok: bool,
    pub latency_ms: u64,
    pub model_info: Option<String>,
}

/// The abstract embedding capability.
///
/// `embed` must return exactly one vector per input string, in input
/// order, each with exactly `limits().embedding_dimensions` finite
/// components; implementations validate before returning.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier persisted with every record
    fn id(&self) -> &str;

    /// Model identifier persisted with every record
    fn model(&self) -> &str;

    fn limits(&self) -> ProviderLimits;

    /// Token estimate used only for batching budgets. The default is
    /// the common chars/4 approximation.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Connectivity check: embeds a probe string and reports latency.
    async fn test(&self) -> ProviderCheck {
        let start = Instant::now();
        let result = self.embed(&["connectivity probe".to_string()]).await;
        ProviderCheck {
            ok: result.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            model_info: result.is_ok().then(|| self.model().to_string()),
        }
    }
}

/// Check an embed response against the contract before handing it to
/// callers: right count, right dimensions, finite components.
pub(crate) fn validate_embeddings(
    input_len: usize,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != input_len {
        return Err(ProviderError::MalformedResponse(format!(
            "expected {input_len} vectors, got {}",
            vectors.len()
        )));
    }
    for v in &vectors {
        if v.len() != dimensions {
            return Err(ProviderError::DimensionMismatch {
                expected: dimensions,
                actual: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(ProviderError::MalformedResponse(
                "non-finite component in embedding".to_string(),
            ));
        }
    }
    Ok(vectors)
}

/// Constructed set of enabled providers, selected by id.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
}

impl ProviderRegistry {
    /// Build every enabled provider from the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        for (id, binding) in config.providers.iter().filter(|(_, p)| p.enabled) {
            providers.insert(id.clone(), build_provider(id, binding)?);
        }
        if providers.is_empty() {
            return Err(ConfigError::Invalid("no enabled providers".to_string()));
        }
        Ok(Self { providers })
    }

    /// Registry with explicitly constructed providers (tests, embedders
    /// the host wires up itself).
    pub fn from_providers(list: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        let providers = list
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();
        Self { providers }
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

fn build_provider(
    id: &str,
    binding: &ProviderConfig,
) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
    let provider: Arc<dyn EmbeddingProvider> = match binding.kind {
        ProviderKind::Remote => Arc::new(HttpProvider::new(id, binding)?),
        ProviderKind::Local => Arc::new(LocalProvider::new(id, binding)?),
    };
    Ok(provider)
}

/// Limits derived from a provider's config binding.
pub(crate) fn limits_from_config(binding: &ProviderConfig) -> ProviderLimits {
    ProviderLimits {
        max_tokens_per_request: binding.max_tokens_per_request,
        max_requests_per_minute: binding.rate_limit.requests_per_minute,
        max_tokens_per_minute: binding.rate_limit.tokens_per_minute,
        recommended_batch_size: binding.recommended_batch_size,
        embedding_dimensions: binding.dimensions,
    }
}
