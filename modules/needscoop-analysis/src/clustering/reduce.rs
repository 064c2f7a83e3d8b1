//! UMAP-style nonlinear dimensionality reduction.
//!
//! Exact cosine k-NN graph, smooth-kNN fuzzy simplicial set, fuzzy union,
//! seeded random init, then SGD with negative sampling. Single-threaded and
//! driven by one seeded RNG, so a fixed seed gives a fixed layout.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::distance::{cosine_distance, squared_euclidean};

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const SMOOTH_K_ITERATIONS: usize = 64;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const INIT_RANGE: f64 = 10.0;
const GRAD_CLIP: f64 = 4.0;
const INITIAL_ALPHA: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct ReduceParams {
    pub n_neighbors: usize,
    pub n_components: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub n_epochs: Option<usize>,
    pub negative_sample_rate: usize,
    pub seed: u64,
}

/// Embed `data` into `params.n_components` dimensions. Callers clamp
/// `n_neighbors` and `n_components` to the corpus; this only guards against
/// degenerate sizes.
pub fn reduce(data: &[Vec<f64>], params: &ReduceParams) -> Vec<Vec<f64>> {
    let n = data.len();
    let dim = params.n_components.max(1);
    if n < 2 {
        return vec![vec![0.0; dim]; n];
    }
    let k = params.n_neighbors.clamp(1, n - 1);

    let (knn_idx, knn_dist) = nearest_neighbors(data, k);
    let directed = fuzzy_simplicial_set(&knn_idx, &knn_dist, k);
    let graph = fuzzy_union(&directed);

    let n_epochs = params
        .n_epochs
        .unwrap_or(if n <= 10_000 { 500 } else { 200 });
    let edges = prune_edges(graph, n_epochs);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut embedding: Vec<f64> = (0..n * dim)
        .map(|_| rng.random_range(-INIT_RANGE..INIT_RANGE))
        .collect();

    if !edges.is_empty() {
        let (a, b) = find_ab_params(params.spread, params.min_dist);
        optimize_layout(
            &mut embedding,
            dim,
            n,
            &edges,
            a,
            b,
            n_epochs,
            params.negative_sample_rate,
            &mut rng,
        );
    }

    embedding.chunks(dim).map(|c| c.to_vec()).collect()
}

/// Exact k nearest neighbors by cosine distance, self excluded.
/// Ties resolve to the lower index.
fn nearest_neighbors(data: &[Vec<f64>], k: usize) -> (Vec<Vec<usize>>, Vec<Vec<f64>>) {
    let n = data.len();
    let mut indices = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for i in 0..n {
        let mut row: Vec<(f64, usize)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (cosine_distance(&data[i], &data[j]), j))
            .collect();
        row.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
        row.truncate(k);
        indices.push(row.iter().map(|(_, j)| *j).collect());
        distances.push(row.iter().map(|(d, _)| *d).collect());
    }
    (indices, distances)
}

/// Per-point membership strengths `exp(-(d - rho) / sigma)`, with `sigma`
/// calibrated so the strengths sum to `log2(k)`.
fn fuzzy_simplicial_set(
    knn_idx: &[Vec<usize>],
    knn_dist: &[Vec<f64>],
    k: usize,
) -> BTreeMap<(usize, usize), f64> {
    let target = (k as f64).log2().max(f64::MIN_POSITIVE);
    let mean_all: f64 = {
        let total: f64 = knn_dist.iter().flatten().sum();
        let count = knn_dist.iter().map(Vec::len).sum::<usize>().max(1);
        total / count as f64
    };

    let mut directed = BTreeMap::new();
    for (i, dists) in knn_dist.iter().enumerate() {
        let rho = dists.iter().copied().find(|d| *d > 0.0).unwrap_or(0.0);

        let mut lo = 0.0;
        let mut hi = f64::INFINITY;
        let mut mid = 1.0;
        for _ in 0..SMOOTH_K_ITERATIONS {
            let psum: f64 = dists
                .iter()
                .map(|d| {
                    let gap = d - rho;
                    if gap > 0.0 {
                        (-gap / mid).exp()
                    } else {
                        1.0
                    }
                })
                .sum();
            if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                break;
            }
            if psum > target {
                hi = mid;
                mid = (lo + hi) / 2.0;
            } else {
                lo = mid;
                mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
            }
        }

        let mean_i = dists.iter().sum::<f64>() / dists.len().max(1) as f64;
        let floor = if rho > 0.0 {
            MIN_K_DIST_SCALE * mean_i
        } else {
            MIN_K_DIST_SCALE * mean_all
        };
        let sigma = mid.max(floor).max(f64::MIN_POSITIVE);

        for (&j, &d) in knn_idx[i].iter().zip(dists) {
            let gap = d - rho;
            let w = if gap > 0.0 { (-gap / sigma).exp() } else { 1.0 };
            directed.insert((i, j), w);
        }
    }
    directed
}

/// Symmetrize with the probabilistic t-conorm `a + b - ab`. Both directions
/// of every undirected edge are kept.
fn fuzzy_union(directed: &BTreeMap<(usize, usize), f64>) -> BTreeMap<(usize, usize), f64> {
    let mut graph = BTreeMap::new();
    for (&(i, j), &w_ij) in directed {
        let w_ji = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let w = w_ij + w_ji - w_ij * w_ji;
        graph.insert((i, j), w);
        graph.insert((j, i), w);
    }
    graph
}

/// Drop edges too weak to be sampled even once across all epochs.
fn prune_edges(graph: BTreeMap<(usize, usize), f64>, n_epochs: usize) -> Vec<(usize, usize, f64)> {
    let max_w = graph.values().copied().fold(0.0, f64::max);
    if max_w <= 0.0 {
        return Vec::new();
    }
    let threshold = max_w / n_epochs as f64;
    graph
        .into_iter()
        .filter(|(_, w)| *w >= threshold && *w > 0.0)
        .map(|((i, j), w)| (i, j, w))
        .collect()
}

/// Fit `1 / (1 + a x^(2b))` to the offset-exponential target defined by
/// `min_dist` and `spread`, by least squares over `[0, 3 * spread]`.
pub(crate) fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| 3.0 * spread * i as f64 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();
    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let fit = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (fit - y) * (fit - y)
            })
            .sum()
    };

    let (mut a, mut b) = (1.5, 0.9);
    let (mut step_a, mut step_b) = (0.5, 0.2);
    let mut best = loss(a, b);
    while step_a > 1e-7 || step_b > 1e-7 {
        let mut improved = false;
        for (da, db) in [(step_a, 0.0), (-step_a, 0.0), (0.0, step_b), (0.0, -step_b)] {
            let (na, nb) = (a + da, b + db);
            if na <= 0.0 || nb <= 0.0 {
                continue;
            }
            let l = loss(na, nb);
            if l < best {
                best = l;
                a = na;
                b = nb;
                improved = true;
            }
        }
        if !improved {
            step_a /= 2.0;
            step_b /= 2.0;
        }
    }
    (a, b)
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRAD_CLIP, GRAD_CLIP)
}

#[allow(clippy::too_many_arguments)]
fn optimize_layout(
    embedding: &mut [f64],
    dim: usize,
    n: usize,
    edges: &[(usize, usize, f64)],
    a: f64,
    b: f64,
    n_epochs: usize,
    negative_sample_rate: usize,
    rng: &mut StdRng,
) {
    let max_w = edges.iter().map(|e| e.2).fold(0.0, f64::max);
    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_w / e.2).collect();
    let neg_rate = negative_sample_rate.max(1) as f64;
    let epochs_per_negative: Vec<f64> = epochs_per_sample.iter().map(|e| e / neg_rate).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let mut current = vec![0.0; dim];
    let mut other = vec![0.0; dim];

    for epoch in 0..n_epochs {
        let alpha = INITIAL_ALPHA * (1.0 - epoch as f64 / n_epochs as f64);
        let epoch_f = epoch as f64;

        for (e, &(head, tail, _)) in edges.iter().enumerate() {
            if next_sample[e] > epoch_f {
                continue;
            }

            current.copy_from_slice(&embedding[head * dim..(head + 1) * dim]);
            other.copy_from_slice(&embedding[tail * dim..(tail + 1) * dim]);
            let dist_sq = squared_euclidean(&current, &other);
            let coeff = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..dim {
                let grad = clip(coeff * (current[d] - other[d]));
                embedding[head * dim + d] += grad * alpha;
                embedding[tail * dim + d] -= grad * alpha;
            }
            next_sample[e] += epochs_per_sample[e];

            let n_neg = ((epoch_f - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..n_neg {
                let k = rng.random_range(0..n);
                if k == head {
                    continue;
                }
                current.copy_from_slice(&embedding[head * dim..(head + 1) * dim]);
                other.copy_from_slice(&embedding[k * dim..(k + 1) * dim]);
                let dist_sq = squared_euclidean(&current, &other);
                let coeff = if dist_sq > 0.0 {
                    2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..dim {
                    let grad = if coeff > 0.0 {
                        clip(coeff * (current[d] - other[d]))
                    } else {
                        GRAD_CLIP
                    };
                    embedding[head * dim + d] += grad * alpha;
                }
            }
            next_negative[e] += n_neg as f64 * epochs_per_negative[e];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_components: usize) -> ReduceParams {
        ReduceParams {
            n_neighbors: 5,
            n_components,
            min_dist: 0.1,
            spread: 1.0,
            n_epochs: Some(100),
            negative_sample_rate: 5,
            seed: 42,
        }
    }

    #[test]
    fn ab_fit_matches_known_defaults() {
        let (a, b) = find_ab_params(1.0, 0.1);
        assert!((a - 1.577).abs() < 0.08, "a = {a}");
        assert!((b - 0.895).abs() < 0.03, "b = {b}");
    }

    #[test]
    fn same_seed_same_layout() {
        let data: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![(i as f64).sin(), (i as f64).cos(), (i % 3) as f64])
            .collect();
        let first = reduce(&data, &params(2));
        let second = reduce(&data, &params(2));
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
        assert!(first.iter().all(|p| p.len() == 2 && p.iter().all(|x| x.is_finite())));
    }

    #[test]
    fn fuzzy_union_is_symmetric() {
        let mut directed = BTreeMap::new();
        directed.insert((0, 1), 0.5);
        directed.insert((1, 0), 0.5);
        directed.insert((1, 2), 1.0);
        let graph = fuzzy_union(&directed);
        assert!((graph[&(0, 1)] - 0.75).abs() < 1e-12);
        assert_eq!(graph[&(1, 2)], graph[&(2, 1)]);
        assert_eq!(graph[&(2, 1)], 1.0);
    }

    #[test]
    fn neighbors_exclude_self() {
        let data = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]];
        let (idx, _) = nearest_neighbors(&data, 2);
        for (i, row) in idx.iter().enumerate() {
            assert!(!row.contains(&i));
        }
        assert_eq!(idx[0][0], 1);
    }
}
