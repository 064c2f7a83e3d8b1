use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeedScoopError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Post {post_id} quarantined after {attempts} attempts: {reason}")]
    Quarantine {
        post_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Oracle schema error: {0}")]
    OracleSchema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Another pipeline run is in progress")]
    RunInProgress,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Failure reported by an external provider (embedding service, judgment oracle).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts, rate limits, 5xx. Worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// Auth failures, rejected input, malformed responses.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<ProviderError> for NeedScoopError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(msg) => NeedScoopError::TransientProvider(msg),
            ProviderError::Permanent(msg) => NeedScoopError::Anyhow(anyhow::anyhow!(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_classification() {
        assert!(ProviderError::Transient("429".into()).is_transient());
        assert!(!ProviderError::Permanent("400".into()).is_transient());
    }

    #[test]
    fn transient_provider_error_converts() {
        let err: NeedScoopError = ProviderError::Transient("timeout".into()).into();
        assert!(matches!(err, NeedScoopError::TransientProvider(_)));
    }
}
