mod client;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::EmbedAgent;
use client::OpenAiClient;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

// =============================================================================
// OpenAi (embeddings)
// =============================================================================

/// Client for OpenAI-compatible `/embeddings` endpoints (OpenAI, Voyage, local servers).
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    embedding_model: String,
    dimensions: Option<usize>,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: None,
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self, AiError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key))
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Request shortened vectors from models that support it.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone());
        match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        }
    }
}

#[async_trait]
impl EmbedAgent for OpenAi {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.client()
            .embed_batch(&self.embedding_model, texts, self.dimensions)
            .await
    }
}
