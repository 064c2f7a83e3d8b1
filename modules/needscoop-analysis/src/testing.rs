// Test doubles for the analysis pipeline.
//
// - HashEmbedder (EmbeddingProvider): deterministic hash-based vectors, with
//   optional topic axes so related texts land near each other
// - FlakyEmbedder (EmbeddingProvider): scripted transient/permanent failures
//   per text, wrapping a HashEmbedder
// - ScriptedOracle (JudgmentOracle): queued responses, then a default
//
// Plus helpers for posts, rule books and stores.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sha2::{Digest, Sha256};

use needscoop_common::{
    EmbeddingProvider, JudgmentOracle, OracleRequest, PipelineConfig, Post, ProviderError,
    RuleBookConfig,
};
use needscoop_store::{MemoryPostStore, MemoryVectorStore, ResultBoard};

use crate::pipeline::PipelineCoordinator;
use crate::signals::RuleBook;

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Dimensionality of fake embeddings.
pub const TEST_EMBEDDING_DIM: usize = 32;

pub const TEST_MODEL: &str = "test-embedding-v1";

/// Fixed reference time for growth windows.
pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embeddings. Each text gets pseudo-random noise seeded by its
/// SHA-256; texts containing a registered topic keyword also get a strong
/// component on that topic's axis.
pub struct HashEmbedder {
    model: String,
    topics: Vec<(String, usize)>,
    noise: f32,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            model: TEST_MODEL.to_string(),
            topics: Vec::new(),
            noise: 1.0,
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Texts containing `keyword` (case-insensitive) point along `axis`.
    pub fn with_topic(mut self, keyword: &str, axis: usize) -> Self {
        self.topics.push((keyword.to_lowercase(), axis % TEST_EMBEDDING_DIM));
        self.noise = 0.05;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = (0..TEST_EMBEDDING_DIM)
            .map(|i| {
                let byte = digest[i % digest.len()] ^ (i as u8).wrapping_mul(37);
                (byte as f32 / 255.0 - 0.5) * self.noise
            })
            .collect();
        let lower = text.to_lowercase();
        for (keyword, axis) in &self.topics {
            if lower.contains(keyword.as_str()) {
                v[*axis] += 1.0;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// FlakyEmbedder
// ---------------------------------------------------------------------------

enum FailureScript {
    /// Fail any call containing the text this many more times.
    Transient(usize),
    AlwaysTransient,
    Permanent,
}

/// Fails calls whose batch contains a scripted text; otherwise delegates.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
    scripts: Mutex<Vec<(String, FailureScript)>>,
    failures: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(inner: HashEmbedder) -> Self {
        Self {
            inner,
            scripts: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Calls containing `text` fail transiently `times` times, then succeed.
    pub fn fail_transient(self, text: &str, times: usize) -> Self {
        self.script(text, FailureScript::Transient(times))
    }

    /// Calls containing `text` always fail transiently.
    pub fn fail_always(self, text: &str) -> Self {
        self.script(text, FailureScript::AlwaysTransient)
    }

    /// Calls containing `text` are rejected outright.
    pub fn reject(self, text: &str) -> Self {
        self.script(text, FailureScript::Permanent)
    }

    fn script(self, text: &str, script: FailureScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push((crate::embedding::normalize(text), script));
        self
    }

    pub fn inner(&self) -> &HashEmbedder {
        &self.inner
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let failure = {
            let mut scripts = self.scripts.lock().unwrap();
            let mut failure = None;
            for (text, script) in scripts.iter_mut() {
                if !texts.iter().any(|t| t.as_str() == text.as_str()) {
                    continue;
                }
                failure = match script {
                    FailureScript::Transient(0) => continue,
                    FailureScript::Transient(n) => {
                        *n -= 1;
                        Some(ProviderError::Transient(format!("scripted 503 for '{text}'")))
                    }
                    FailureScript::AlwaysTransient => {
                        Some(ProviderError::Transient(format!("scripted timeout for '{text}'")))
                    }
                    FailureScript::Permanent => {
                        Some(ProviderError::Permanent(format!("scripted 400 for '{text}'")))
                    }
                };
                break;
            }
            failure
        };

        if let Some(error) = failure {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(error);
        }
        self.inner.embed_batch(texts).await
    }
}

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

/// Replays queued responses in order, then answers with the default.
pub struct ScriptedOracle {
    queue: Mutex<VecDeque<Result<String, ProviderError>>>,
    default: Result<String, ProviderError>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: Ok(response.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: Err(ProviderError::Transient("oracle offline".into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, response: Result<String, ProviderError>) -> Self {
        self.queue.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgmentOracle for ScriptedOracle {
    async fn judge(&self, request: &OracleRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.queue.lock().unwrap().pop_front() {
            Some(response) => response,
            None => self.default.clone(),
        }
    }
}

/// A well-formed oracle answer.
pub fn verdict_json(clarity: f64, monetization: f64) -> String {
    format!(
        r#"{{"clarity": {clarity}, "market": 60, "monetization": {monetization}, "competition": 40, "feasibility": 70, "rationale": "recurring, specific pain"}}"#
    )
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn post(id: &str, text: &str, created_at: DateTime<Utc>) -> Post {
    Post::builder()
        .id(id)
        .source("test")
        .text(text)
        .created_at(created_at)
        .collected_at(created_at)
        .build()
}

/// `count` distinct posts containing `phrase`, one per day before [`as_of`].
pub fn posts_with_phrase(prefix: &str, phrase: &str, count: usize) -> Vec<Post> {
    (0..count)
        .map(|i| {
            let mut p = post(
                &format!("{prefix}-{i:03}"),
                &format!("{phrase} a simple tool for problem number {i}, nothing works"),
                as_of() - Duration::days(i as i64 + 1),
            );
            p.likes = i as u64;
            p
        })
        .collect()
}

pub const TEST_RULES: &str = r#"
[default]
min_length = 20
max_length = 1000
exclusions = ["follow for follow", "giveaway"]

[[default.categories]]
name = "desire"
description = "Wishing a product existed"
weight = 1.0
patterns = ["I wish there was", "I wish someone would"]

[[default.categories]]
name = "frustration"
weight = 0.9
patterns = ["so annoying", { pattern = "why (is|isn't) there", regex = true }]

[[default.categories]]
name = "complaint"
weight = 0.8
patterns = ["worst", "broken again"]
"#;

pub fn rule_book() -> RuleBook {
    let config: RuleBookConfig = toml::from_str(TEST_RULES).unwrap();
    RuleBook::compile(&config).unwrap()
}

/// Defaults tuned for small fixture corpora: no backoff sleeps, fast layout.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.embedding.model = TEST_MODEL.to_string();
    config.embedding.base_backoff_ms = 0;
    config.embedding.max_backoff_ms = 0;
    config.embedding.jitter_ms = 0;
    config.oracle.retry_delay_ms = 0;
    config.clustering.n_epochs = Some(100);
    config
}

/// A coordinator over fresh in-memory stores.
pub struct TestPipeline {
    pub coordinator: PipelineCoordinator,
    pub vectors: Arc<MemoryVectorStore>,
    pub posts: Arc<MemoryPostStore>,
    pub board: Arc<ResultBoard>,
}

pub fn pipeline(
    embedder: Arc<dyn EmbeddingProvider>,
    oracle: Arc<dyn JudgmentOracle>,
) -> TestPipeline {
    let vectors = Arc::new(MemoryVectorStore::new());
    let posts = Arc::new(MemoryPostStore::new());
    let board = Arc::new(ResultBoard::new());
    let coordinator = PipelineCoordinator::builder()
        .embedder(embedder)
        .oracle(oracle)
        .vectors(vectors.clone())
        .posts(posts.clone())
        .board(board.clone())
        .build();
    TestPipeline {
        coordinator,
        vectors,
        posts,
        board,
    }
}
