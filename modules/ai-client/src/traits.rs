use async_trait::async_trait;

use crate::error::AiError;

// =============================================================================
// EmbedAgent Trait
// =============================================================================

#[async_trait]
pub trait EmbedAgent: Send + Sync {
    /// Identifier of the embedding model, used to version stored vectors.
    fn embedding_model(&self) -> &str;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError>;
}

// =============================================================================
// ChatAgent Trait
// =============================================================================

#[async_trait]
pub trait ChatAgent: Send + Sync {
    async fn chat_completion(&self, system: &str, user: &str) -> Result<String, AiError>;
}
