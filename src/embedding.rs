/**
 * Embedding Provider (C7)
 * External capability boundary for turning chunk text into vectors. The
 * HTTP implementation mirrors the teacher's OpenRouter embeddings call;
 * swap in a different provider without touching the orchestrator.
 */

use async_trait::async_trait;
use serde_json::json;

use crate::error::{DircError, DircResult};
use crate::validation::validate_embedding;

/// External embedding capability. `dimensions()` lets callers validate
/// vectors before they reach the vector store.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> DircResult<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> DircResult<Vec<Vec<f32>>>;
}

/// HTTP-backed provider, modeled on the teacher's `RAGService::generate_embedding`.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(api_key: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key,
            model,
            dimensions,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn call(&self, input: serde_json::Value) -> DircResult<serde_json::Value> {
        let payload = json!({
            "model": self.model,
            "input": input,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DircError::EmbeddingError(format!(
                "embedding provider returned {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    fn extract_vector(data: &serde_json::Value, index: usize) -> DircResult<Vec<f32>> {
        data["data"][index]["embedding"]
            .as_array()
            .ok_or_else(|| DircError::EmbeddingError("invalid embedding shape".to_string()))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| DircError::EmbeddingError("non-numeric embedding value".to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> DircResult<Vec<f32>> {
        let data = self.call(json!(text)).await?;
        let vector = Self::extract_vector(&data, 0)?;
        validate_embedding(&vector, self.dimensions)?;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> DircResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let data = self.call(json!(texts)).await?;
        (0..texts.len())
            .map(|i| {
                let vector = Self::extract_vector(&data, i)?;
                validate_embedding(&vector, self.dimensions)?;
                Ok(vector)
            })
            .collect()
    }
}

/// Deterministic test double: hashes text into a fixed-dimension vector so
/// identical text always embeds identically, without any network call.
pub struct DeterministicMockEmbeddingProvider {
    dimensions: usize,
    fail_on_text: Option<String>,
}

impl DeterministicMockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail_on_text: None,
        }
    }

    /// Used by rollback tests: any `embed`/`embed_batch` call touching this
    /// exact text fails, simulating a provider outage partway through a batch.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on_text = Some(text.to_string());
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut seed: u64 = 1469598103934665603;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(1099511628211);
        }
        (0..self.dimensions)
            .map(|i| {
                let mixed = seed.wrapping_add(i as u64).wrapping_mul(2654435761);
                ((mixed % 2000) as f32 / 1000.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicMockEmbeddingProvider {
    fn model_name(&self) -> &str {
        "mock-deterministic"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> DircResult<Vec<f32>> {
        if self.fail_on_text.as_deref() == Some(text) {
            return Err(DircError::EmbeddingError(format!(
                "mock provider configured to fail on: {}",
                text
            )));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> DircResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let provider = DeterministicMockEmbeddingProvider::new(8);
        let a = provider.embed("hola mundo").await.unwrap();
        let b = provider.embed("hola mundo").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn mock_provider_differs_across_texts() {
        let provider = DeterministicMockEmbeddingProvider::new(8);
        let a = provider.embed("texto uno").await.unwrap();
        let b = provider.embed("texto dos").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn mock_provider_fails_on_configured_text() {
        let provider = DeterministicMockEmbeddingProvider::new(4).failing_on("chunk 3");
        assert!(provider.embed("chunk 1").await.is_ok());
        assert!(provider.embed("chunk 3").await.is_err());
    }

    #[tokio::test]
    async fn batch_embed_preserves_order_and_fails_fast() {
        let provider = DeterministicMockEmbeddingProvider::new(4).failing_on("c");
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let result = provider.embed_batch(&texts).await;
        assert!(result.is_err());
    }
}
