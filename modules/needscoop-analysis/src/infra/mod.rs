pub mod embedder;
pub mod feed;
pub mod oracle;
pub mod report;

pub use embedder::Embedder;
pub use feed::JsonlPostSource;
pub use oracle::ClaudeOracle;
pub use report::JsonReportWriter;

use ai_client::AiError;
use needscoop_common::ProviderError;

/// Map client errors onto the retry taxonomy.
pub(crate) fn provider_error(e: AiError) -> ProviderError {
    if e.is_transient() {
        ProviderError::Transient(e.to_string())
    } else {
        ProviderError::Permanent(e.to_string())
    }
}
