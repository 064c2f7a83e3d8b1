use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response: {0}")]
    Empty(String),
}

impl AiError {
    /// Whether a caller should retry the request that produced this error.
    ///
    /// Connection failures, timeouts, rate limits and server-side errors are
    /// transient. Auth failures, bad requests and undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) => true,
            AiError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            AiError::Config(_) | AiError::Parse(_) | AiError::Empty(_) => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AiError::Parse(e.to_string())
        } else {
            AiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for AiError {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        AiError::Config(format!("invalid header value: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [408, 429, 500, 502, 503] {
            let err = AiError::Api {
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            let err = AiError::Api {
                status,
                body: String::new(),
            };
            assert!(!err.is_transient(), "{status} should be permanent");
        }
        assert!(!AiError::Parse("bad json".into()).is_transient());
        assert!(!AiError::Config("missing key".into()).is_transient());
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(AiError::Network("connection reset".into()).is_transient());
    }
}
