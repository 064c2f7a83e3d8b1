use ai_client::{ChatAgent, Claude};
use async_trait::async_trait;

use needscoop_common::{JudgmentOracle, OracleRequest, ProviderError};

use super::provider_error;

/// Judgment oracle backed by the Claude messages API.
pub struct ClaudeOracle {
    client: Claude,
}

impl ClaudeOracle {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Claude::new(api_key, model),
        }
    }
}

#[async_trait]
impl JudgmentOracle for ClaudeOracle {
    async fn judge(&self, request: &OracleRequest) -> Result<String, ProviderError> {
        self.client
            .chat_completion(&request.system, &request.prompt)
            .await
            .map_err(provider_error)
    }
}
