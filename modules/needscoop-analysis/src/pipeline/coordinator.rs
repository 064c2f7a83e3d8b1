use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use needscoop_common::{
    ClusterReport, ClusterState, EmbeddingProvider, JudgmentOracle, NeedScoopError,
    PipelineConfig, Post, PostStore, PublishedRun, RunSummary, SignalAnnotation, VectorStore,
};
use needscoop_store::ResultBoard;

use crate::clustering::ClusterEngine;
use crate::embedding::{EmbedOutcome, EmbeddingOrchestrator, EmbeddingStats};
use crate::pipeline::ranking::{corpus_fingerprint, rank};
use crate::scoring::{representative_samples, ScoringEngine};
use crate::signals::{RuleBook, SignalDetector};

const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Reference time for growth windows.
    pub as_of: DateTime<Utc>,
    pub cancel: Arc<AtomicBool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            as_of: Utc::now(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RunOptions {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), NeedScoopError> {
        if self.cancelled() {
            info!("Pipeline run cancelled");
            Err(NeedScoopError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub posts_seen: u32,
    pub posts_excluded: u32,
    pub posts_unclassified: u32,
    pub stats: EmbeddingStats,
    pub quarantined: Vec<String>,
    pub marked_stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RescanReport {
    pub ruleset_version: String,
    pub posts: u32,
    pub changed_primary: u32,
    pub newly_classified: u32,
    pub excluded: u32,
}

impl std::fmt::Display for RescanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rescan {}: {} posts, {} changed primary category, {} newly classified, {} excluded",
            self.ruleset_version, self.posts, self.changed_primary, self.newly_classified, self.excluded,
        )
    }
}

/// Output of the classification stage.
struct Classified {
    candidates: Vec<Post>,
    primaries: HashMap<String, Option<String>>,
    excluded: u32,
    unclassified: u32,
}

/// Clears the single-run flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, NeedScoopError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| NeedScoopError::RunInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn store_err(e: anyhow::Error) -> NeedScoopError {
    NeedScoopError::Store(format!("{e:#}"))
}

/// Sequences classification, embedding, clustering and scoring over one
/// corpus snapshot, then publishes the ranked result in one swap.
#[derive(TypedBuilder)]
pub struct PipelineCoordinator {
    embedder: Arc<dyn EmbeddingProvider>,
    oracle: Arc<dyn JudgmentOracle>,
    vectors: Arc<dyn VectorStore>,
    posts: Arc<dyn PostStore>,
    #[builder(default = Arc::new(ResultBoard::new()))]
    board: Arc<ResultBoard>,
    #[builder(default, setter(skip))]
    running: AtomicBool,
}

impl PipelineCoordinator {
    pub fn board(&self) -> &Arc<ResultBoard> {
        &self.board
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Full analysis run. Publishes only when every stage completes.
    pub async fn run(
        &self,
        corpus: Vec<Post>,
        config: &PipelineConfig,
        rules: &RuleBook,
        options: RunOptions,
    ) -> Result<PublishedRun, NeedScoopError> {
        config.validate()?;
        let _guard = RunGuard::acquire(&self.running)?;
        let run_id = Uuid::new_v4();
        info!(%run_id, posts = corpus.len(), ruleset = rules.version(), "Pipeline run starting");

        let corpus = order_corpus(corpus);
        let posts_seen = corpus.len() as u32;
        self.posts.put_posts(&corpus).await.map_err(store_err)?;

        let classified = self.classify(corpus, rules).await?;
        options.check()?;

        let embedded = self.embed(&classified.candidates, config, &options).await?;
        // Vectors written before an abort still invalidate the published ranking.
        if !embedded.newly_written.is_empty() {
            self.board.mark_stale();
        }
        if embedded.cancelled {
            return Err(NeedScoopError::Cancelled);
        }
        options.check()?;

        let vectors = embedded.vectors.clone();
        let engine = ClusterEngine::new(config.clustering.clone());
        let clustering = tokio::task::spawn_blocking(move || engine.cluster(&vectors))
            .await
            .map_err(|e| NeedScoopError::Anyhow(anyhow::anyhow!("clustering task failed: {e}")))??;
        options.check()?;
        let clustered = ClusterState::Embedded.transition(ClusterState::Clustered)?;

        let by_id: HashMap<&str, &Post> = classified
            .candidates
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();
        let scoring = ScoringEngine::new(self.oracle.as_ref(), &config.scoring, &config.oracle);

        let mut scored = Vec::with_capacity(clustering.clusters.len());
        let mut details = HashMap::new();
        let mut oracle_fallbacks = 0;
        for cluster in &clustering.clusters {
            options.check()?;
            let members: Vec<&Post> = cluster
                .members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            let categories = category_histogram(&cluster.members, &classified.primaries);
            let result = scoring
                .score(cluster, &members, &categories, options.as_of)
                .await;
            if result.record.unscored_by_oracle {
                oracle_fallbacks += 1;
            }
            let state = clustered.transition(ClusterState::Scored)?;

            let quotes = representative_samples(
                &members,
                config.oracle.sample_size,
                config.oracle.sample_max_chars,
            );
            let first = members.iter().map(|p| p.created_at).min().unwrap_or(options.as_of);
            let last = members.iter().map(|p| p.created_at).max().unwrap_or(options.as_of);
            details.insert(cluster.id, (result.growth, categories, quotes, first, last, state));
            scored.push((result.record, cluster.size));
        }

        let mut reports = Vec::with_capacity(scored.len());
        for (i, (record, size)) in rank(scored).into_iter().enumerate() {
            let Some((growth, categories, quotes, first, last, state)) =
                details.remove(&record.cluster_id)
            else {
                continue;
            };
            let state = state.transition(ClusterState::Ranked)?;
            reports.push(ClusterReport {
                rank: i + 1,
                cluster_id: record.cluster_id,
                size,
                score: record,
                growth,
                categories,
                quotes,
                first_post_at: first,
                last_post_at: last,
                state,
            });
        }

        let summary = RunSummary {
            posts_seen,
            posts_excluded: classified.excluded,
            posts_unclassified: classified.unclassified,
            embeddings_reused: embedded.stats.reused,
            embeddings_created: embedded.stats.embedded,
            cache_hits: embedded.stats.cache_hits,
            duplicates_suppressed: embedded.stats.duplicates_suppressed,
            retry_events: embedded.stats.retry_events,
            quarantined: embedded.quarantined.iter().map(|q| q.post_id.clone()).collect(),
            noise_posts: clustering.noise_count() as u32,
            clusters: clustering.clusters.len() as u32,
            oracle_fallbacks,
            degenerate: clustering.degenerate,
        };

        // Last chance to abandon before readers see anything.
        options.check()?;

        let run = PublishedRun {
            run_id,
            run_at: Utc::now(),
            corpus_fingerprint: corpus_fingerprint(&embedded.vectors),
            ruleset_version: rules.version().to_string(),
            model_version: self.embedder.model_version().to_string(),
            reports,
            summary,
        };
        self.board.publish(run.clone());
        info!(%run_id, clusters = run.reports.len(), "Pipeline run complete");
        Ok(run)
    }

    /// Classification and embedding only. Marks the published ranking stale
    /// when new vectors were written.
    pub async fn embed_only(
        &self,
        corpus: Vec<Post>,
        config: &PipelineConfig,
        rules: &RuleBook,
        options: RunOptions,
    ) -> Result<EmbedReport, NeedScoopError> {
        config.validate()?;
        let _guard = RunGuard::acquire(&self.running)?;

        let corpus = order_corpus(corpus);
        let posts_seen = corpus.len() as u32;
        self.posts.put_posts(&corpus).await.map_err(store_err)?;

        let classified = self.classify(corpus, rules).await?;
        options.check()?;

        let embedded = self.embed(&classified.candidates, config, &options).await?;
        let marked_stale = !embedded.newly_written.is_empty();
        if marked_stale {
            self.board.mark_stale();
        }
        if embedded.cancelled {
            return Err(NeedScoopError::Cancelled);
        }

        Ok(EmbedReport {
            posts_seen,
            posts_excluded: classified.excluded,
            posts_unclassified: classified.unclassified,
            quarantined: embedded.quarantined.iter().map(|q| q.post_id.clone()).collect(),
            stats: embedded.stats,
            marked_stale,
        })
    }

    /// Re-classify every stored post under `rules`. Embeddings are untouched.
    pub async fn rescan(&self, rules: &RuleBook) -> Result<RescanReport, NeedScoopError> {
        let _guard = RunGuard::acquire(&self.running)?;
        rescan_posts(self.posts.as_ref(), rules).await
    }

    async fn classify(&self, corpus: Vec<Post>, rules: &RuleBook) -> Result<Classified, NeedScoopError> {
        let detector = SignalDetector::new(rules);
        let now = Utc::now();
        let mut classified = Classified {
            candidates: Vec::with_capacity(corpus.len()),
            primaries: HashMap::new(),
            excluded: 0,
            unclassified: 0,
        };

        for post in corpus {
            let annotation: SignalAnnotation = detector.annotate(&post, now);
            let excluded = annotation.excluded;
            let primary = annotation.primary.clone();
            self.posts
                .record_annotation(annotation)
                .await
                .map_err(store_err)?;

            if excluded {
                classified.excluded += 1;
                continue;
            }
            if primary.is_none() {
                classified.unclassified += 1;
            }
            classified.primaries.insert(post.id.clone(), primary);
            classified.candidates.push(post);
        }

        info!(
            candidates = classified.candidates.len(),
            excluded = classified.excluded,
            unclassified = classified.unclassified,
            "Classification complete"
        );
        Ok(classified)
    }

    /// Embed candidates and record quarantine outcomes through the post store.
    async fn embed(
        &self,
        candidates: &[Post],
        config: &PipelineConfig,
        options: &RunOptions,
    ) -> Result<EmbedOutcome, NeedScoopError> {
        let orchestrator =
            EmbeddingOrchestrator::new(self.embedder.as_ref(), self.vectors.as_ref(), &config.embedding)
                .with_cancel(options.cancel.clone());
        let outcome = orchestrator.embed(candidates).await?;

        let model = self.embedder.model_version();
        for record in &outcome.quarantined {
            self.posts
                .mark_quarantined(record.clone())
                .await
                .map_err(store_err)?;
        }
        for post_id in &outcome.newly_written {
            self.posts
                .clear_quarantine(post_id, model)
                .await
                .map_err(store_err)?;
        }
        if !outcome.quarantined.is_empty() {
            warn!(
                count = outcome.quarantined.len(),
                "Posts quarantined, will retry on next run"
            );
        }
        Ok(outcome)
    }
}

/// Re-classify every post in `posts` under `rules`, appending one annotation
/// per post. Needs no embedding or judgment provider.
pub async fn rescan_posts(
    posts: &dyn PostStore,
    rules: &RuleBook,
) -> Result<RescanReport, NeedScoopError> {
    let detector = SignalDetector::new(rules);
    let now = Utc::now();

    let mut report = RescanReport {
        ruleset_version: rules.version().to_string(),
        ..Default::default()
    };
    for post in posts.posts().await.map_err(store_err)? {
        let previous = posts.latest_annotation(&post.id).await.map_err(store_err)?;
        let annotation = detector.annotate(&post, now);

        let previous_primary = previous.as_ref().and_then(|a| a.primary.as_deref());
        if previous.is_some() && previous_primary != annotation.primary.as_deref() {
            report.changed_primary += 1;
        }
        if previous_primary.is_none() && annotation.primary.is_some() {
            report.newly_classified += 1;
        }
        if annotation.excluded {
            report.excluded += 1;
        }
        report.posts += 1;

        posts.record_annotation(annotation).await.map_err(store_err)?;
    }
    info!(%report, "Rescan complete");
    Ok(report)
}

/// Sort by post id and drop repeated ids, keeping the first occurrence.
fn order_corpus(mut corpus: Vec<Post>) -> Vec<Post> {
    corpus.sort_by(|a, b| a.id.cmp(&b.id));
    corpus.dedup_by(|later, earlier| later.id == earlier.id);
    corpus
}

fn category_histogram(
    members: &[String],
    primaries: &HashMap<String, Option<String>>,
) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for id in members {
        let category = primaries
            .get(id)
            .and_then(|p| p.clone())
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        *histogram.entry(category).or_insert(0) += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, text: &str) -> Post {
        Post::builder().id(id).text(text).created_at(Utc::now()).build()
    }

    #[test]
    fn corpus_ordering_dedupes_ids() {
        let ordered = order_corpus(vec![post("b", "1"), post("a", "2"), post("b", "3")]);
        let ids: Vec<&str> = ordered.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(ordered[1].text, "1");
    }

    #[test]
    fn histogram_counts_unclassified() {
        let primaries = HashMap::from([
            ("a".to_string(), Some("desire".to_string())),
            ("b".to_string(), None),
            ("c".to_string(), Some("desire".to_string())),
        ]);
        let h = category_histogram(&["a".into(), "b".into(), "c".into()], &primaries);
        assert_eq!(h["desire"], 2);
        assert_eq!(h["unclassified"], 1);
    }

    #[test]
    fn run_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let _held = RunGuard::acquire(&flag).unwrap();
            assert!(matches!(
                RunGuard::acquire(&flag),
                Err(NeedScoopError::RunInProgress)
            ));
        }
        assert!(RunGuard::acquire(&flag).is_ok());
    }
}
