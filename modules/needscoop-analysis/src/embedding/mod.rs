//! Embedding orchestration: dedupe, cache, batch, retry, persist.
//!
//! Provider calls fan out with bounded concurrency. Every result funnels back
//! through one consumer loop, which is the only code that writes vectors.

pub mod cache;
pub mod retry;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use needscoop_common::{
    EmbeddingConfig, EmbeddingProvider, EmbeddingVector, NeedScoopError, Post, ProviderError,
    QuarantineRecord, VectorStore,
};

pub use cache::{content_hash, normalize, ContentCache};
pub use retry::Backoff;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EmbeddingStats {
    /// Posts that entered the stage.
    pub requested: u32,
    /// Posts that already had a vector under this model.
    pub reused: u32,
    /// Posts whose normalized text matched an already-stored vector.
    pub cache_hits: u32,
    /// Posts that shared a provider call with identical content in this run.
    pub duplicates_suppressed: u32,
    /// Vectors written from provider responses.
    pub embedded: u32,
    pub retry_events: u32,
    pub quarantined: u32,
}

impl fmt::Display for EmbeddingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Embedding: {} requested, {} reused, {} cache hits, {} duplicates, {} embedded, {} retries, {} quarantined",
            self.requested,
            self.reused,
            self.cache_hits,
            self.duplicates_suppressed,
            self.embedded,
            self.retry_events,
            self.quarantined,
        )
    }
}

#[derive(Debug, Default)]
pub struct EmbedOutcome {
    /// Every current-model vector for the requested posts, new or reused.
    pub vectors: Vec<EmbeddingVector>,
    /// Post ids that received a vector during this call.
    pub newly_written: Vec<String>,
    pub quarantined: Vec<QuarantineRecord>,
    pub stats: EmbeddingStats,
    pub cancelled: bool,
}

/// Posts sharing one normalized text.
#[derive(Debug, Clone)]
struct ContentGroup {
    hash: String,
    text: String,
    post_ids: Vec<String>,
}

struct GroupResult {
    group: ContentGroup,
    result: Result<Vec<f32>, CallFailure>,
}

struct BatchResult {
    groups: Vec<GroupResult>,
    retries: u32,
}

#[derive(Debug, Clone)]
struct CallFailure {
    error: ProviderError,
    attempts: u32,
}

pub struct EmbeddingOrchestrator<'a> {
    provider: &'a dyn EmbeddingProvider,
    store: &'a dyn VectorStore,
    config: &'a EmbeddingConfig,
    backoff: Backoff,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> EmbeddingOrchestrator<'a> {
    pub fn new(
        provider: &'a dyn EmbeddingProvider,
        store: &'a dyn VectorStore,
        config: &'a EmbeddingConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            backoff: Backoff::from_config(config),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Make sure every post has a current-model vector, or a quarantine record
    /// explaining why not.
    pub async fn embed(&self, posts: &[Post]) -> Result<EmbedOutcome, NeedScoopError> {
        let model = self.provider.model_version().to_string();
        let mut outcome = EmbedOutcome::default();

        let mut seen = HashSet::new();
        let posts: Vec<&Post> = posts.iter().filter(|p| seen.insert(p.id.as_str())).collect();
        outcome.stats.requested = posts.len() as u32;

        let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let existing = self
            .store
            .get_many(&ids, &model)
            .await
            .map_err(|e| NeedScoopError::Store(format!("{e:#}")))?;
        let existing_ids: HashSet<String> = existing.iter().map(|v| v.post_id.clone()).collect();
        outcome.stats.reused = existing.len() as u32;

        let stored = self
            .store
            .list(&model)
            .await
            .map_err(|e| NeedScoopError::Store(format!("{e:#}")))?;
        let mut cache = ContentCache::new(&model);
        cache.warm(&stored);
        let mut expected_dims = self.config.dimensions.or_else(|| cache.dimensions());

        outcome.vectors = existing;

        // Cache hits are written immediately; the rest are grouped by content.
        let mut groups: Vec<ContentGroup> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();
        for post in posts.iter().filter(|p| !existing_ids.contains(&p.id)) {
            let hash = content_hash(&post.text);
            if let Some(vector) = cache.get(&hash) {
                let record = vector_record(&post.id, vector.clone(), &model, &hash);
                self.persist(&record).await?;
                outcome.stats.cache_hits += 1;
                outcome.newly_written.push(post.id.clone());
                outcome.vectors.push(record);
                continue;
            }
            match group_index.get(&hash) {
                Some(&i) => {
                    groups[i].post_ids.push(post.id.clone());
                    outcome.stats.duplicates_suppressed += 1;
                }
                None => {
                    group_index.insert(hash.clone(), groups.len());
                    groups.push(ContentGroup {
                        text: normalize(&post.text),
                        hash,
                        post_ids: vec![post.id.clone()],
                    });
                }
            }
        }

        if groups.is_empty() {
            outcome.vectors.sort_by(|a, b| a.post_id.cmp(&b.post_id));
            info!(stats = %outcome.stats, "Embedding stage complete");
            return Ok(outcome);
        }

        let batches: Vec<Vec<ContentGroup>> = groups
            .chunks(self.config.batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        info!(
            groups = groups.len(),
            batches = batches.len(),
            max_in_flight = self.config.max_in_flight,
            model = %model,
            "Embedding pending content"
        );

        let mut results = std::pin::pin!(stream::iter(
            batches.into_iter().map(|batch| self.run_batch(batch))
        )
        .buffer_unordered(self.config.max_in_flight.max(1)));

        // Single writer: the only place vectors reach the store.
        while let Some(batch) = results.next().await {
            outcome.stats.retry_events += batch.retries;
            for GroupResult { group, result } in batch.groups {
                let failure = match result {
                    Ok(vector) => match expected_dims {
                        Some(d) if d != vector.len() => CallFailure {
                            error: ProviderError::Permanent(format!(
                                "dimension mismatch: expected {d}, got {}",
                                vector.len()
                            )),
                            attempts: 1,
                        },
                        _ => {
                            expected_dims = Some(vector.len());
                            for post_id in &group.post_ids {
                                let record =
                                    vector_record(post_id, vector.clone(), &model, &group.hash);
                                self.persist(&record).await?;
                                outcome.stats.embedded += 1;
                                outcome.newly_written.push(post_id.clone());
                                outcome.vectors.push(record);
                            }
                            cache.insert(group.hash, vector);
                            continue;
                        }
                    },
                    Err(failure) => failure,
                };
                for post_id in group.post_ids {
                    warn!(
                        post_id = %post_id,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Embedding failed, quarantining post"
                    );
                    outcome.stats.quarantined += 1;
                    outcome.quarantined.push(QuarantineRecord {
                        post_id,
                        model_version: model.clone(),
                        attempts: failure.attempts,
                        last_error: failure.error.to_string(),
                        quarantined_at: Utc::now(),
                    });
                }
            }

            if self.is_cancelled() {
                info!("Embedding cancelled, keeping vectors written so far");
                outcome.cancelled = true;
                break;
            }
        }

        outcome.vectors.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        info!(stats = %outcome.stats, "Embedding stage complete");
        Ok(outcome)
    }

    async fn persist(&self, record: &EmbeddingVector) -> Result<(), NeedScoopError> {
        self.store
            .put(record.clone())
            .await
            .map_err(|e| NeedScoopError::Store(format!("{e:#}")))
    }

    /// One batch call. On failure, fall back to one call per item so a single
    /// bad input cannot sink its batch-mates.
    async fn run_batch(&self, batch: Vec<ContentGroup>) -> BatchResult {
        let texts: Vec<String> = batch.iter().map(|g| g.text.clone()).collect();
        let (result, mut retries) = self.call_with_retry(&texts).await;

        match result {
            Ok(vectors) => BatchResult {
                groups: batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(group, v)| GroupResult {
                        group,
                        result: Ok(v),
                    })
                    .collect(),
                retries,
            },
            Err(failure) if batch.len() == 1 => BatchResult {
                groups: batch
                    .into_iter()
                    .map(|group| GroupResult {
                        group,
                        result: Err(failure.clone()),
                    })
                    .collect(),
                retries,
            },
            Err(failure) => {
                warn!(
                    size = batch.len(),
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Batch failed, retrying items individually"
                );
                let mut groups = Vec::with_capacity(batch.len());
                for group in batch {
                    let (result, item_retries) =
                        self.call_with_retry(std::slice::from_ref(&group.text)).await;
                    retries += item_retries;
                    let result = result.and_then(|mut v| {
                        v.pop().ok_or(CallFailure {
                            error: ProviderError::Permanent("empty response".into()),
                            attempts: 1,
                        })
                    });
                    groups.push(GroupResult { group, result });
                }
                BatchResult { groups, retries }
            }
        }
    }

    /// Call the provider up to `max_attempts` times. Only transient failures
    /// are retried. Returns the result and the number of retries taken.
    async fn call_with_retry(
        &self,
        texts: &[String],
    ) -> (Result<Vec<Vec<f32>>, CallFailure>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut retries = 0;
        let mut attempt = 1;
        loop {
            let result = self
                .provider
                .embed_batch(texts)
                .await
                .and_then(|vectors| validate_response(texts.len(), vectors));
            match result {
                Ok(vectors) => return (Ok(vectors), retries),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient embedding failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                    attempt += 1;
                }
                Err(error) => return (Err(CallFailure { error, attempts: attempt }), retries),
            }
        }
    }
}

fn vector_record(post_id: &str, vector: Vec<f32>, model: &str, hash: &str) -> EmbeddingVector {
    EmbeddingVector {
        post_id: post_id.to_string(),
        dimensions: vector.len(),
        vector,
        model_version: model.to_string(),
        content_hash: hash.to_string(),
    }
}

/// Count, non-empty, consistent dimensionality, finite values.
fn validate_response(
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::Permanent(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    let dims = vectors.first().map(Vec::len).unwrap_or(0);
    if expected > 0 && dims == 0 {
        return Err(ProviderError::Permanent("empty vector in response".into()));
    }
    if vectors.iter().any(|v| v.len() != dims) {
        return Err(ProviderError::Permanent(
            "inconsistent dimensionality in response".into(),
        ));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(ProviderError::Permanent("non-finite value in response".into()));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_count_mismatch() {
        assert!(validate_response(2, vec![vec![1.0]]).is_err());
    }

    #[test]
    fn validate_rejects_ragged_and_non_finite() {
        assert!(validate_response(2, vec![vec![1.0, 2.0], vec![1.0]]).is_err());
        assert!(validate_response(1, vec![vec![f32::NAN]]).is_err());
        assert!(validate_response(1, vec![vec![]]).is_err());
        assert!(validate_response(2, vec![vec![1.0], vec![2.0]]).is_ok());
    }
}
