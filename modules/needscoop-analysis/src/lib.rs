pub mod clustering;
pub mod embedding;
pub mod infra;
pub mod pipeline;
pub mod scoring;
pub mod signals;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use clustering::{ClusterEngine, ClusterResult};
pub use embedding::{EmbedOutcome, EmbeddingOrchestrator, EmbeddingStats};
pub use pipeline::{PipelineCoordinator, RunOptions};
pub use scoring::{ScoredCluster, ScoringEngine};
pub use signals::{Classification, RuleBook, SignalDetector};
