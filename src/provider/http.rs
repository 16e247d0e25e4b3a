//! Remote OpenAI-compatible embedding provider
//!
//! Speaks the `/v1/embeddings` JSON shape: request `{model, input}`,
//! response `{data: [{index, embedding}]}`. Vectors are re-ordered by
//! the response `index` field before validation, since the contract
//! requires output order to match input order.

use serde::Deserialize;
use std::time::Duration;

use super::{limits_from_config, validate_embeddings, EmbeddingProvider, ProviderError, ProviderLimits};
use crate::config::{ConfigError, ProviderConfig};

pub struct HttpProvider {
    id: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    limits: ProviderLimits,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpProvider {
    pub fn new(id: &str, binding: &ProviderConfig) -> Result<Self, ConfigError> {
        let api_key = if binding.api_key_env.is_empty() {
            None
        } else {
            // The hosting CLI sets the variable; absence is an auth
            // failure at call time, not a config error, so the run can
            // still be planned offline.
            std::env::var(&binding.api_key_env).ok()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(binding.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        Ok(Self {
            id: id.to_string(),
            model: binding.model.clone(),
            endpoint: format!("{}/v1/embeddings", binding.base_url.trim_end_matches('/')),
            api_key,
            limits: limits_from_config(binding),
            client,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HttpProvider {
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
        if texts.iter().any(|t| t.is_empty()) {
            return Err(ProviderError::InvalidInput(
                "empty string in embed input".to_string(),
            ));
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "model": self.model, "input": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(ProviderError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in parsed.data {
            let slot = vectors.get_mut(item.index).ok_or_else(|| {
                ProviderError::MalformedResponse(format!(
                    "embedding index {} out of range",
                    item.index
                ))
            })?;
            *slot = Some(item.embedding);
        }
        let vectors: Vec<Vec<f32>> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    ProviderError::MalformedResponse(format!("missing embedding for input {i}"))
                })
            })
            .collect::<Result<_, _>>()?;

        validate_embeddings(texts.len(), vectors, self.limits.embedding_dimensions)
    }
}
