//! Local HTTP embedding provider (Ollama-style endpoint)
//!
//! Speaks `/api/embed`: request `{model, input}`, response
//! `{embeddings: [[f32]]}` already in input order. Intended for
//! localhost inference servers, so no auth header and a shorter default
//! timeout would be reasonable — the binding's timeout applies either
//! way.

use serde::Deserialize;
use std::time::Duration;

use super::{limits_from_config, validate_embeddings, EmbeddingProvider, ProviderError, ProviderLimits};
use crate::config::{ConfigError, ProviderConfig};

pub struct LocalProvider {
    id: String,
    model: String,
    endpoint: String,
    limits: ProviderLimits,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl LocalProvider {
    pub fn new(id: &str, binding: &ProviderConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(binding.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        Ok(Self {
            id: id.to_string(),
            model: binding.model.clone(),
            endpoint: format!("{}/api/embed", binding.base_url.trim_end_matches('/')),
            limits: limits_from_config(binding),
            client,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LocalProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        validate_embeddings(texts.len(), parsed.embeddings, self.limits.embedding_dimensions)
    }
}
