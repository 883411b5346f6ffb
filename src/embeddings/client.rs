use async_trait::async_trait;
use crate::config::EmbeddingsConfig;
use crate::errors::AppError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

pub struct CloudEmbedder {
    client: reqwest::Client,
    config: EmbeddingsConfig,
}

impl CloudEmbedder {
    pub fn new(config: EmbeddingsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Embedder for CloudEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        // Standard OpenAI embeddings format, also spoken by local TEI servers
        // POST /v1/embeddings { "input": text, "model": "..." }
        let payload = serde_json::json!({
            "input": text,
            "model": self.config.model_name,
        });

        let res = self
            .client
            .post(&self.config.model_api_url)
            .header("Authorization", format!("Bearer {}", self.config.model_api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError(format!("Request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(AppError::EmbeddingError(format!("API Error: {}", res.status())));
        }

        // Response matches OpenAI format: data[0].embedding
        let body: serde_json::Value = res
            .json()
            .await
            .map_err(|e| AppError::EmbeddingError(format!("Parse error: {}", e)))?;

        let embedding = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| AppError::EmbeddingError("Invalid response format".to_string()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or_default() as f32)
            .collect();

        Ok(embedding)
    }
}

/// Deterministic embedder for local development and tests
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, AppError> {
        Ok(vec![0.5; self.dim])
    }
}
