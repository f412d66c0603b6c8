use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use super::keyword::tokenize;
use super::{SearchError, SearchResult};
use crate::config::constants::search::{OPENAI_EMBEDDING_MODEL, OPENAI_EMBEDDINGS_URL};
use crate::config::{EmbeddingProviderKind, SearchConfig};

/// Text to vector provider
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>>;

    /// Embed several texts; the default embeds them one at a time
    async fn embed_batch(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize;

    fn model(&self) -> &str;
}

/// Deterministic offline embedder using signed feature hashing of terms and
/// character trigrams
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model: format!("hashing-v1-{dimensions}"),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let index = (bucket % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for term in tokenize(text) {
            self.accumulate(&mut vector, &term, 1.0);
            let padded: Vec<char> = format!("#{term}#").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, &trigram, 0.5);
            }
        }
        super::index::normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
            model: model.into(),
            dimensions,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request(&self, input: serde_json::Value) -> SearchResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": input,
                "dimensions": self.dimensions,
            }))
            .send()
            .await
            .map_err(|err| SearchError::Embedding(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Embedding(format!(
                "embedding API error {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Embedding(format!("failed to parse response: {err}")))?;
        parsed.data.sort_by_key(|data| data.index);

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(vector) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(SearchError::DimensionMismatch {
                collection: format!("<{}>", self.model),
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> SearchResult<Vec<f32>> {
        self.request(json!(text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Embedding("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(json!(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(SearchError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Stand-in for a provider that could not be configured. Every call fails
/// with [`SearchError::Embedding`], which search callers treat as "no vectors".
#[derive(Debug, Clone)]
pub struct UnavailableEmbedder {
    reason: String,
    model: String,
    dimensions: usize,
}

impl UnavailableEmbedder {
    pub fn new(reason: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            reason: reason.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> SearchResult<Vec<f32>> {
        Err(SearchError::Embedding(self.reason.clone()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build the embedder a deployment is configured for. A missing API key is
/// an error here so callers can fall back to keyword search explicitly.
pub fn embedder_from_config(config: &SearchConfig) -> SearchResult<Arc<dyn Embedder>> {
    match config.embedding_provider {
        EmbeddingProviderKind::Hashing => Ok(Arc::new(
            HashingEmbedder::new(config.dimensions).with_model(config.embedding_model.clone()),
        )),
        EmbeddingProviderKind::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                SearchError::Embedding(format!(
                    "environment variable '{}' is not set",
                    config.api_key_env
                ))
            })?;
            let model = if config.embedding_model.starts_with("hashing") {
                OPENAI_EMBEDDING_MODEL.to_string()
            } else {
                config.embedding_model.clone()
            };
            let mut embedder = OpenAiEmbedder::new(api_key, model, config.dimensions);
            if let Some(endpoint) = &config.endpoint {
                embedder = embedder.with_endpoint(endpoint.clone());
            }
            Ok(Arc::new(embedder))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::cosine_similarity;

    #[tokio::test]
    async fn hashing_is_deterministic_and_normalized() -> SearchResult<()> {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("search the web for pages").await?;
        let b = embedder.embed("search the web for pages").await?;
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[tokio::test]
    async fn related_text_scores_higher() -> SearchResult<()> {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("weather forecast").await?;
        let close = embedder.embed("daily weather forecast for cities").await?;
        let far = embedder.embed("convert currency amounts").await?;
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
        Ok(())
    }

    #[test]
    fn openai_requires_api_key() {
        let config = SearchConfig {
            embedding_provider: EmbeddingProviderKind::OpenAi,
            api_key_env: "TOOLHUB_TEST_MISSING_EMBED_KEY_9C2".into(),
            ..SearchConfig::default()
        };
        assert!(matches!(
            embedder_from_config(&config),
            Err(SearchError::Embedding(_))
        ));
    }
}
