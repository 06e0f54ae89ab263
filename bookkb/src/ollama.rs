//! Ollama embedding provider (feature `ollama`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embeddings served by a local or remote Ollama instance.
///
/// Calls `POST {base_url}/api/embeddings` per text. Errors (network,
/// non-success status, wrong dimensionality) are surfaced as
/// [`KbError::Embedding`] so the caller's fallback wrapper can take over.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimensions,
        }
    }

    fn error(&self, message: impl Into<String>) -> KbError {
        KbError::Embedding { provider: "ollama".to_string(), message: message.into() }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        trace!(url, model = self.model, chars = text.len(), "requesting embedding");

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { model: &self.model, prompt: text })
            .send()
            .await
            .map_err(|e| self.error(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("server returned {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("invalid response body: {e}")))?;

        if parsed.embedding.len() != self.dimensions {
            return Err(self.error(format!(
                "model '{}' returned {} dimensions, expected {}",
                self.model,
                parsed.embedding.len(),
                self.dimensions
            )));
        }

        Ok(parsed.embedding)
    }
}
