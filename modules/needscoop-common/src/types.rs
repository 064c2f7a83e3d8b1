use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::lifecycle::ClusterState;

// --- Posts ---

/// A collected social-media post. Immutable once collected; analysis results
/// live beside it as annotations, never inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Post {
    #[builder(setter(into))]
    pub id: String,
    #[builder(default = String::from("unknown"), setter(into))]
    pub source: String,
    #[builder(setter(into))]
    pub text: String,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
    #[builder(default)]
    #[serde(default)]
    pub likes: u64,
    #[builder(default)]
    #[serde(default)]
    pub reposts: u64,
    #[builder(default)]
    #[serde(default)]
    pub replies: u64,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub language: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub uri: Option<String>,
}

impl Post {
    pub fn engagement(&self) -> u64 {
        self.likes
            .saturating_add(self.reposts)
            .saturating_add(self.replies)
    }
}

// --- Signals ---

/// One category that matched a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMatch {
    pub post_id: String,
    pub category: String,
    /// Source text of every pattern in the category that matched.
    pub patterns: Vec<String>,
    /// Effective weight after the multi-pattern boost.
    pub weight: f64,
}

/// Classification of one post under one rule-set version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAnnotation {
    pub post_id: String,
    pub ruleset_version: String,
    pub matches: Vec<SignalMatch>,
    /// `None` means unclassified.
    pub primary: Option<String>,
    pub excluded: bool,
    #[serde(default)]
    pub exclusion_reason: Option<String>,
    pub classified_at: DateTime<Utc>,
}

impl SignalAnnotation {
    pub fn is_classified(&self) -> bool {
        self.primary.is_some()
    }
}

// --- Embeddings ---

/// One vector per post per model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub post_id: String,
    pub vector: Vec<f32>,
    pub dimensions: usize,
    pub model_version: String,
    /// SHA-256 hex of the normalized text.
    pub content_hash: String,
}

/// Deferred-retry marker for a post whose embedding failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub post_id: String,
    pub model_version: String,
    pub attempts: u32,
    pub last_error: String,
    pub quarantined_at: DateTime<Utc>,
}

/// Restricts a vector store query.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub model_version: String,
    /// When set, only these posts are candidates.
    pub post_ids: Option<HashSet<String>>,
}

impl VectorFilter {
    pub fn model(model_version: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            post_ids: None,
        }
    }

    pub fn allows(&self, post_id: &str) -> bool {
        self.post_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(post_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub post_id: String,
    /// Cosine distance, `1 - cos(a, b)`.
    pub distance: f32,
}

// --- Clusters ---

/// Run-scoped cluster label. Not stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterLabel {
    Noise,
    Cluster(ClusterId),
}

impl ClusterLabel {
    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    pub fn cluster_id(&self) -> Option<ClusterId> {
        match self {
            ClusterLabel::Noise => None,
            ClusterLabel::Cluster(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    /// Member post ids in ascending order.
    pub members: Vec<String>,
    pub size: usize,
    /// Mean of member vectors in the native embedding space.
    pub centroid: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degenerate {
    AllNoise,
    SingleCluster,
}

impl fmt::Display for Degenerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degenerate::AllNoise => write!(f, "all noise"),
            Degenerate::SingleCluster => write!(f, "single cluster"),
        }
    }
}

// --- Scoring ---

/// Qualitative judgments the oracle returns beyond the two scored components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleJudgment {
    pub market: f64,
    pub competition: f64,
    pub feasibility: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub cluster_id: ClusterId,
    pub volume: f64,
    pub engagement: f64,
    pub growth: f64,
    pub clarity: f64,
    pub monetization: f64,
    pub composite: f64,
    /// Set when the oracle never produced a valid answer and clarity and
    /// monetization hold the neutral fallback.
    pub unscored_by_oracle: bool,
    pub oracle: Option<OracleJudgment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthMetrics {
    pub recent: usize,
    pub prior: usize,
    /// `recent / prior`, absent when `prior` is zero.
    pub ratio: Option<f64>,
}

/// A request for qualitative judgment of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub cluster_id: ClusterId,
    pub system: String,
    pub prompt: String,
}

// --- Reports ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub rank: usize,
    pub cluster_id: ClusterId,
    pub size: usize,
    pub score: ScoreRecord,
    pub growth: GrowthMetrics,
    /// Primary signal category histogram; unclassified members count under `unclassified`.
    pub categories: BTreeMap<String, usize>,
    pub quotes: Vec<String>,
    pub first_post_at: DateTime<Utc>,
    pub last_post_at: DateTime<Utc>,
    pub state: ClusterState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub posts_seen: u32,
    pub posts_excluded: u32,
    pub posts_unclassified: u32,
    pub embeddings_reused: u32,
    pub embeddings_created: u32,
    pub cache_hits: u32,
    pub duplicates_suppressed: u32,
    pub retry_events: u32,
    pub quarantined: Vec<String>,
    pub noise_posts: u32,
    pub clusters: u32,
    pub oracle_fallbacks: u32,
    pub degenerate: Option<Degenerate>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== NeedScoop Run Complete ===")?;
        writeln!(f, "Posts seen:           {}", self.posts_seen)?;
        writeln!(f, "Posts excluded:       {}", self.posts_excluded)?;
        writeln!(f, "Posts unclassified:   {}", self.posts_unclassified)?;
        writeln!(f, "\nEmbeddings:")?;
        writeln!(f, "  Reused:             {}", self.embeddings_reused)?;
        writeln!(f, "  Created:            {}", self.embeddings_created)?;
        writeln!(f, "  Cache hits:         {}", self.cache_hits)?;
        writeln!(f, "  Duplicates:         {}", self.duplicates_suppressed)?;
        writeln!(f, "  Retry events:       {}", self.retry_events)?;
        writeln!(f, "  Quarantined:        {}", self.quarantined.len())?;
        writeln!(f, "\nClustering:")?;
        writeln!(f, "  Clusters:           {}", self.clusters)?;
        writeln!(f, "  Noise posts:        {}", self.noise_posts)?;
        if let Some(degenerate) = self.degenerate {
            writeln!(f, "  Degenerate result:  {degenerate}")?;
        }
        writeln!(f, "\nOracle fallbacks:     {}", self.oracle_fallbacks)?;
        Ok(())
    }
}

/// A complete ranked result set. Swapped in whole for readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedRun {
    pub run_id: Uuid,
    pub run_at: DateTime<Utc>,
    /// SHA-256 over the sorted candidate post ids and their content hashes.
    pub corpus_fingerprint: String,
    pub ruleset_version: String,
    pub model_version: String,
    pub reports: Vec<ClusterReport>,
    pub summary: RunSummary,
}
