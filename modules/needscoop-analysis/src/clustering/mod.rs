//! Density-based grouping of post embeddings.
//!
//! Inputs are sorted by post id before any computation, so labels depend only
//! on the embedding set, the seed and the parameters.

pub mod distance;
pub mod hdbscan;
pub mod reduce;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use needscoop_common::{
    Cluster, ClusterId, ClusterLabel, ClusteringConfig, Degenerate, EmbeddingVector,
    NeedScoopError,
};

use hdbscan::{hdbscan, HdbscanParams};
use reduce::{reduce, ReduceParams};

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// One label per input post, in post-id order.
    pub labels: Vec<(String, ClusterLabel)>,
    pub clusters: Vec<Cluster>,
    pub degenerate: Option<Degenerate>,
}

impl ClusterResult {
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|(_, l)| l.is_noise()).count()
    }

    pub fn label_of(&self, post_id: &str) -> Option<ClusterLabel> {
        self.labels
            .binary_search_by(|(id, _)| id.as_str().cmp(post_id))
            .ok()
            .map(|i| self.labels[i].1)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterEngine {
    config: ClusteringConfig,
}

impl ClusterEngine {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn cluster(&self, embeddings: &[EmbeddingVector]) -> Result<ClusterResult, NeedScoopError> {
        let mut sorted: Vec<&EmbeddingVector> = embeddings.iter().collect();
        sorted.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        validate(&sorted)?;

        let n = sorted.len();
        let ids: Vec<String> = sorted.iter().map(|v| v.post_id.clone()).collect();

        if n < self.config.min_cluster_size {
            info!(
                posts = n,
                min_cluster_size = self.config.min_cluster_size,
                "Corpus smaller than minimum cluster size, all posts are noise"
            );
            return Ok(ClusterResult {
                labels: ids.into_iter().map(|id| (id, ClusterLabel::Noise)).collect(),
                clusters: Vec::new(),
                degenerate: Some(Degenerate::AllNoise),
            });
        }

        let native_dims = sorted[0].vector.len();
        let data: Vec<Vec<f64>> = sorted
            .iter()
            .map(|v| v.vector.iter().map(|x| *x as f64).collect())
            .collect();

        let n_components = self
            .config
            .reduced_dimensions
            .min(native_dims)
            .min(n.saturating_sub(2))
            .max(1);
        let n_neighbors = self.config.n_neighbors.min(n - 1).max(1);
        debug!(
            posts = n,
            native_dims, n_components, n_neighbors, "Reducing embeddings"
        );
        let reduced = reduce(
            &data,
            &ReduceParams {
                n_neighbors,
                n_components,
                min_dist: self.config.min_dist,
                spread: self.config.spread,
                n_epochs: self.config.n_epochs,
                negative_sample_rate: self.config.negative_sample_rate,
                seed: self.config.seed,
            },
        );

        let raw = hdbscan(
            &reduced,
            &HdbscanParams {
                min_cluster_size: self.config.min_cluster_size,
                min_samples: self.config.min_samples,
                selection_epsilon: self.config.selection_epsilon,
                allow_single_cluster: self.config.allow_single_cluster,
            },
        );

        // Renumber 0..k in order of each cluster's first member.
        let mut remap: BTreeMap<usize, ClusterId> = BTreeMap::new();
        let mut labels = Vec::with_capacity(n);
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (i, raw_label) in raw.iter().enumerate() {
            let label = match raw_label {
                None => ClusterLabel::Noise,
                Some(r) => {
                    let next = ClusterId(remap.len() as u32);
                    let id = *remap.entry(*r).or_insert(next);
                    if id.0 as usize == members.len() {
                        members.push(Vec::new());
                    }
                    members[id.0 as usize].push(i);
                    ClusterLabel::Cluster(id)
                }
            };
            labels.push((ids[i].clone(), label));
        }

        let clusters: Vec<Cluster> = members
            .iter()
            .enumerate()
            .map(|(c, idx)| Cluster {
                id: ClusterId(c as u32),
                members: idx.iter().map(|&i| ids[i].clone()).collect(),
                size: idx.len(),
                centroid: centroid(idx.iter().map(|&i| sorted[i].vector.as_slice()), native_dims),
            })
            .collect();

        let degenerate = match clusters.len() {
            0 => Some(Degenerate::AllNoise),
            1 => Some(Degenerate::SingleCluster),
            _ => None,
        };
        let result = ClusterResult {
            labels,
            clusters,
            degenerate,
        };
        info!(
            posts = n,
            clusters = result.clusters.len(),
            noise = result.noise_count(),
            degenerate = ?result.degenerate,
            "Clustering complete"
        );
        Ok(result)
    }
}

fn validate(sorted: &[&EmbeddingVector]) -> Result<(), NeedScoopError> {
    let Some(first) = sorted.first() else {
        return Ok(());
    };
    let dims = first.vector.len();
    if dims == 0 {
        return Err(NeedScoopError::Validation("embeddings are empty".into()));
    }
    let mut seen = HashSet::new();
    for v in sorted {
        if !seen.insert(v.post_id.as_str()) {
            return Err(NeedScoopError::Validation(format!(
                "duplicate embedding for post {}",
                v.post_id
            )));
        }
        if v.vector.len() != dims {
            return Err(NeedScoopError::Validation(format!(
                "post {} has {} dimensions, expected {dims}",
                v.post_id,
                v.vector.len()
            )));
        }
        if v.vector.iter().any(|x| !x.is_finite()) {
            return Err(NeedScoopError::Validation(format!(
                "post {} has a non-finite embedding value",
                v.post_id
            )));
        }
    }
    Ok(())
}

fn centroid<'a>(vectors: impl Iterator<Item = &'a [f32]>, dims: usize) -> Vec<f32> {
    let mut sum = vec![0.0f64; dims];
    let mut count = 0usize;
    for v in vectors {
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
        count += 1;
    }
    let count = count.max(1) as f64;
    sum.into_iter().map(|s| (s / count) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, vector: Vec<f32>) -> EmbeddingVector {
        EmbeddingVector {
            post_id: id.to_string(),
            dimensions: vector.len(),
            vector,
            model_version: "m".into(),
            content_hash: id.to_string(),
        }
    }

    #[test]
    fn small_corpus_is_all_noise() {
        let engine = ClusterEngine::new(ClusteringConfig::default());
        let result = engine
            .cluster(&[ev("a", vec![1.0, 0.0]), ev("b", vec![0.0, 1.0]), ev("c", vec![1.0, 1.0])])
            .unwrap();
        assert!(result.clusters.is_empty());
        assert_eq!(result.noise_count(), 3);
        assert_eq!(result.degenerate, Some(Degenerate::AllNoise));
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let engine = ClusterEngine::new(ClusteringConfig::default());
        let err = engine
            .cluster(&[ev("a", vec![1.0, 0.0]), ev("b", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, NeedScoopError::Validation(_)));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let engine = ClusterEngine::new(ClusteringConfig::default());
        assert!(engine.cluster(&[ev("a", vec![f32::NAN, 0.0])]).is_err());
    }

    #[test]
    fn centroid_is_member_mean() {
        let a = [1.0f32, 2.0];
        let b = [3.0f32, 4.0];
        let c = centroid([&a[..], &b[..]].into_iter(), 2);
        assert_eq!(c, vec![2.0, 3.0]);
    }

    #[test]
    fn label_lookup_by_post_id() {
        let result = ClusterResult {
            labels: vec![
                ("a".into(), ClusterLabel::Cluster(ClusterId(0))),
                ("b".into(), ClusterLabel::Noise),
            ],
            clusters: vec![],
            degenerate: None,
        };
        assert_eq!(result.label_of("b"), Some(ClusterLabel::Noise));
        assert_eq!(result.label_of("z"), None);
    }
}
