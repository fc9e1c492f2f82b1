//! Embedding collaborator backed by an OpenAI-compatible `/embeddings` endpoint.
//!
//! Works with any provider that implements the endpoint: OpenAI, Together,
//! Ollama, vLLM, LM Studio, etc.

use crate::llm::{truncate_chars, LlmClient, LlmError};
use async_trait::async_trait;
use strata_types::collaborator::Embedder;
use strata_types::config::EmbeddingConfig;
use tracing::warn;

/// Input is truncated to this many chars before embedding.
pub const MAX_EMBED_CHARS: usize = 8000;

pub struct OpenAiEmbedder {
    client: LlmClient,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, LlmError> {
        let client = LlmClient::new(&config.base_url, config.api_key.as_deref())?;
        if !is_local(client.base_url()) {
            warn!(
                base_url = %client.base_url(),
                model = %config.model,
                "Embedding requests go to an external API; memory content will leave this machine"
            );
        }
        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dimensions,
        })
    }
}

fn is_local(base_url: &str) -> bool {
    base_url.contains("localhost") || base_url.contains("127.0.0.1") || base_url.contains("[::1]")
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        let input = [truncate_chars(text, MAX_EMBED_CHARS).to_string()];
        match self.client.embeddings(&self.model, &input).await {
            Ok(mut vectors) => {
                let vector = vectors.pop().flatten();
                if vector.is_none() {
                    warn!(model = %self.model, "Empty embedding returned");
                }
                vector
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "Failed to generate embedding");
                None
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t, MAX_EMBED_CHARS).to_string())
            .collect();
        match self.client.embeddings(&self.model, &inputs).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(model = %self.model, count = texts.len(), error = %e, "Batch embedding failed");
                vec![None; texts.len()]
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
