pub mod config;
pub mod error;
pub mod file_config;
pub mod lifecycle;
pub mod rules;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{NeedScoopError, ProviderError};
pub use file_config::{
    load_config, ClusteringConfig, EmbeddingConfig, OracleConfig, PipelineConfig, ScoringConfig,
    ScoringWeights, SignalsConfig,
};
pub use lifecycle::ClusterState;
pub use rules::{CategoryConfig, PatternEntry, RuleBookConfig, RuleSetConfig};
pub use traits::{
    EmbeddingProvider, JudgmentOracle, PostSource, PostStore, ReportBuilder, RuleSource,
    VectorStore,
};
pub use types::*;
