use ai_client::{truncate_to_char_boundary, EmbedAgent, OpenAi};
use async_trait::async_trait;

use needscoop_common::{EmbeddingConfig, EmbeddingProvider, ProviderError};

use super::provider_error;

/// Stays under the endpoint's per-input token limit.
const MAX_INPUT_BYTES: usize = 24_000;

/// OpenAI-compatible `/embeddings` endpoint.
pub struct Embedder {
    client: OpenAi,
    model_version: String,
}

impl Embedder {
    pub fn new(api_key: &str, config: &EmbeddingConfig, base_url: Option<&str>) -> Self {
        let mut client = OpenAi::new(api_key).with_embedding_model(&config.model);
        if let Some(dims) = config.dimensions {
            client = client.with_dimensions(dims);
        }
        if let Some(url) = base_url {
            client = client.with_base_url(url);
        }
        // Truncated-dimension vectors are not comparable with full ones.
        let model_version = match config.dimensions {
            Some(dims) => format!("{}@{}", config.model, dims),
            None => config.model.clone(),
        };
        Self {
            client,
            model_version,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for Embedder {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| truncate_to_char_boundary(t, MAX_INPUT_BYTES).to_string())
            .collect();
        self.client.embed_batch(&inputs).await.map_err(provider_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_version_includes_truncated_dimensions() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(
            Embedder::new("sk-test", &config, None).model_version(),
            "text-embedding-3-small"
        );
        config.dimensions = Some(256);
        assert_eq!(
            Embedder::new("sk-test", &config, None).model_version(),
            "text-embedding-3-small@256"
        );
    }
}
