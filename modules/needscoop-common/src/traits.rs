// Capability traits for everything outside the analysis core.
//
// PostSource: the collector feed.
// EmbeddingProvider / JudgmentOracle: external model services.
// VectorStore / PostStore: persistence, single writer per run.
// RuleSource / ReportBuilder: configuration in, results out.
//
// Test doubles implement these with deterministic in-memory behavior.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{NeedScoopError, ProviderError};
use crate::rules::RuleBookConfig;
use crate::types::{
    EmbeddingVector, Neighbor, OracleRequest, Post, PublishedRun, QuarantineRecord,
    SignalAnnotation, VectorFilter,
};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PostSource: Send + Sync {
    /// A point-in-time snapshot of collected posts.
    async fn snapshot(&self) -> Result<Vec<Post>>;
}

#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load_rules(&self) -> Result<RuleBookConfig, NeedScoopError>;
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stored alongside each vector. Changing it invalidates prior embeddings.
    fn model_version(&self) -> &str;

    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

#[async_trait]
pub trait JudgmentOracle: Send + Sync {
    /// Raw model output. Parsing and validation happen in the caller.
    async fn judge(&self, request: &OracleRequest) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a vector. Keyed by (post id, model version).
    async fn put(&self, vector: EmbeddingVector) -> Result<()>;

    /// Stored vectors for the given posts under one model. Missing posts are skipped.
    async fn get_many(&self, post_ids: &[String], model_version: &str)
        -> Result<Vec<EmbeddingVector>>;

    /// Every vector stored under one model.
    async fn list(&self, model_version: &str) -> Result<Vec<EmbeddingVector>>;

    /// Nearest neighbors by cosine distance, closest first.
    async fn query(&self, vector: &[f32], k: usize, filter: &VectorFilter)
        -> Result<Vec<Neighbor>>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn put_posts(&self, posts: &[Post]) -> Result<()>;
    async fn posts(&self) -> Result<Vec<Post>>;
    async fn get_post(&self, post_id: &str) -> Result<Option<Post>>;

    async fn record_annotation(&self, annotation: SignalAnnotation) -> Result<()>;
    /// The most recently recorded annotation for a post, under any rule-set version.
    async fn latest_annotation(&self, post_id: &str) -> Result<Option<SignalAnnotation>>;

    async fn mark_quarantined(&self, record: QuarantineRecord) -> Result<()>;
    async fn clear_quarantine(&self, post_id: &str, model_version: &str) -> Result<()>;
    async fn quarantined(&self, model_version: &str) -> Result<Vec<QuarantineRecord>>;
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReportBuilder: Send + Sync {
    async fn build(&self, run: &PublishedRun) -> Result<()>;
}
