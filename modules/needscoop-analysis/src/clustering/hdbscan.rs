//! HDBSCAN over Euclidean points.
//!
//! Core distances, mutual-reachability MST (Prim), single-linkage hierarchy,
//! condensed tree, excess-of-mass selection.

use std::collections::VecDeque;

use super::distance::euclidean;

/// Floor for merge distances when converting to lambda = 1 / distance.
const MIN_DISTANCE: f64 = 1e-12;

/// A point held only by a selected root must leave the hierarchy at no less
/// than this fraction of the root's densest fall-out lambda, otherwise it is
/// noise. Equivalent to a GLOSH outlier score of at most 0.9.
const ROOT_MEMBER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub selection_epsilon: f64,
    pub allow_single_cluster: bool,
}

/// Cluster membership per point. Cluster indices are arbitrary but stable for
/// identical input; `None` is noise.
pub fn hdbscan(points: &[Vec<f64>], params: &HdbscanParams) -> Vec<Option<usize>> {
    let n = points.len();
    let min_cluster_size = params.min_cluster_size.max(2);
    if n < min_cluster_size || n < 2 {
        return vec![None; n];
    }

    let core = core_distances(points, params.min_samples);
    let mut edges = mutual_reachability_mst(points, &core);
    edges.sort_by(|x, y| {
        x.2.total_cmp(&y.2)
            .then(x.0.min(x.1).cmp(&y.0.min(y.1)))
            .then(x.0.max(x.1).cmp(&y.0.max(y.1)))
    });
    let merges = single_linkage(n, &edges);
    let tree = condense(n, &merges, min_cluster_size);
    let selected = select_clusters(&tree, params);
    label_points(&tree, &selected, params)
}

/// Distance from each point to its `min_samples`-th nearest other point.
fn core_distances(points: &[Vec<f64>], min_samples: usize) -> Vec<f64> {
    let n = points.len();
    let k = min_samples.clamp(1, n.saturating_sub(1).max(1));
    (0..n)
        .map(|i| {
            let mut d: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| euclidean(&points[i], &points[j]))
                .collect();
            d.sort_by(f64::total_cmp);
            d.get(k - 1).copied().unwrap_or(0.0)
        })
        .collect()
}

/// Prim's algorithm over the dense mutual-reachability graph.
fn mutual_reachability_mst(points: &[Vec<f64>], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = points.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut best_from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = euclidean(&points[current], &points[j])
                .max(core[current])
                .max(core[j]);
            if d < best[j] {
                best[j] = d;
                best_from[j] = current;
            }
        }
        let mut next = usize::MAX;
        for j in 0..n {
            if !in_tree[j] && (next == usize::MAX || best[j] < best[next]) {
                next = j;
            }
        }
        in_tree[next] = true;
        edges.push((best_from[next], next, best[next]));
        current = next;
    }
    edges
}

#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Dendrogram from sorted MST edges. Leaves are `0..n`; merge `m` is node `n + m`.
fn single_linkage(n: usize, sorted_edges: &[(usize, usize, f64)]) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..n).collect();
    let mut node_of: Vec<usize> = (0..n).collect();
    let mut size_of = vec![1usize; 2 * n];
    let mut merges = Vec::with_capacity(n - 1);

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for &(a, b, distance) in sorted_edges {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra == rb {
            continue;
        }
        let (left, right) = (node_of[ra], node_of[rb]);
        let id = n + merges.len();
        let size = size_of[left] + size_of[right];
        size_of[id] = size;
        merges.push(Merge {
            left,
            right,
            distance,
            size,
        });
        parent[rb] = ra;
        node_of[ra] = id;
    }
    merges
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Child {
    Point(usize),
    Cluster(usize),
}

#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: Child,
    lambda: f64,
    size: usize,
}

#[derive(Debug)]
struct CondensedTree {
    edges: Vec<CondensedEdge>,
    /// Lambda at which each cluster appeared. The root is born at 0.
    birth: Vec<f64>,
    parent: Vec<Option<usize>>,
    /// Cluster each point falls out of.
    point_parent: Vec<usize>,
    /// Lambda at which each point falls out.
    point_lambda: Vec<f64>,
}

impl CondensedTree {
    fn children(&self, cluster: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().filter_map(move |e| match e.child {
            Child::Cluster(c) if e.parent == cluster => Some(c),
            _ => None,
        })
    }

    fn stability(&self) -> Vec<f64> {
        let mut stability = vec![0.0; self.birth.len()];
        for e in &self.edges {
            stability[e.parent] += (e.lambda - self.birth[e.parent]) * e.size as f64;
        }
        stability
    }

    fn descendants(&self, cluster: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.children(cluster).collect();
        while let Some(c) = stack.pop() {
            out.push(c);
            stack.extend(self.children(c));
        }
        out
    }
}

fn node_size(n: usize, merges: &[Merge], node: usize) -> usize {
    if node < n {
        1
    } else {
        merges[node - n].size
    }
}

fn leaves(n: usize, merges: &[Merge], node: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(x) = stack.pop() {
        if x < n {
            out.push(x);
        } else {
            let m = merges[x - n];
            stack.push(m.right);
            stack.push(m.left);
        }
    }
    out
}

/// Walk the dendrogram top-down. A split is real only when both sides hold at
/// least `min_cluster_size` points; otherwise the smaller side's points fall
/// out of the surviving cluster.
fn condense(n: usize, merges: &[Merge], min_cluster_size: usize) -> CondensedTree {
    let root = n + merges.len() - 1;
    let mut tree = CondensedTree {
        edges: Vec::new(),
        birth: vec![0.0],
        parent: vec![None],
        point_parent: vec![0; n],
        point_lambda: vec![0.0; n],
    };
    let mut label_of = vec![0usize; n + merges.len()];
    let mut queue = VecDeque::from([root]);

    while let Some(node) = queue.pop_front() {
        let m = merges[node - n];
        let lambda = 1.0 / m.distance.max(MIN_DISTANCE);
        let parent = label_of[node];
        let sides = [
            (m.left, node_size(n, merges, m.left)),
            (m.right, node_size(n, merges, m.right)),
        ];

        if sides.iter().all(|&(_, s)| s >= min_cluster_size) {
            for (child, size) in sides {
                let label = tree.birth.len();
                tree.birth.push(lambda);
                tree.parent.push(Some(parent));
                label_of[child] = label;
                tree.edges.push(CondensedEdge {
                    parent,
                    child: Child::Cluster(label),
                    lambda,
                    size,
                });
                queue.push_back(child);
            }
            continue;
        }

        for (child, size) in sides {
            if size < min_cluster_size {
                for point in leaves(n, merges, child) {
                    tree.point_parent[point] = parent;
                    tree.point_lambda[point] = lambda;
                    tree.edges.push(CondensedEdge {
                        parent,
                        child: Child::Point(point),
                        lambda,
                        size: 1,
                    });
                }
            } else {
                label_of[child] = parent;
                queue.push_back(child);
            }
        }
    }
    tree
}

/// Excess-of-mass selection, then the optional epsilon merge.
fn select_clusters(tree: &CondensedTree, params: &HdbscanParams) -> Vec<bool> {
    let count = tree.birth.len();
    let mut stability = tree.stability();
    let mut selected = vec![false; count];

    // Children always carry larger labels than their parent.
    for c in (0..count).rev() {
        if c == 0 && !params.allow_single_cluster {
            continue;
        }
        let children: Vec<usize> = tree.children(c).collect();
        if children.is_empty() {
            selected[c] = true;
            continue;
        }
        let child_sum: f64 = children.iter().map(|&k| stability[k]).sum();
        if child_sum > stability[c] {
            stability[c] = child_sum;
        } else {
            selected[c] = true;
            for d in tree.descendants(c) {
                selected[d] = false;
            }
        }
    }

    if params.selection_epsilon > 0.0 {
        let eps = params.selection_epsilon;
        let birth_distance = |c: usize| {
            if tree.birth[c] > 0.0 {
                1.0 / tree.birth[c]
            } else {
                f64::INFINITY
            }
        };
        let chosen: Vec<usize> = (0..count).filter(|&c| selected[c]).collect();
        for c in chosen {
            if birth_distance(c) >= eps {
                continue;
            }
            let mut target = c;
            while let Some(p) = tree.parent[target] {
                if p == 0 && !params.allow_single_cluster {
                    break;
                }
                target = p;
                if birth_distance(target) >= eps {
                    break;
                }
            }
            if target != c {
                selected[target] = true;
                for d in tree.descendants(target) {
                    selected[d] = false;
                }
            }
        }
    }

    selected
}

fn label_points(
    tree: &CondensedTree,
    selected: &[bool],
    params: &HdbscanParams,
) -> Vec<Option<usize>> {
    let root_threshold = selected
        .first()
        .copied()
        .unwrap_or(false)
        .then(|| root_member_threshold(tree, params));

    tree.point_parent
        .iter()
        .zip(&tree.point_lambda)
        .map(|(&start, &lambda)| {
            let mut c = start;
            loop {
                if selected[c] {
                    return match root_threshold {
                        Some(threshold) if c == 0 && lambda < threshold => None,
                        _ => Some(c),
                    };
                }
                match tree.parent[c] {
                    Some(p) => c = p,
                    None => return None,
                }
            }
        })
        .collect()
}

/// Minimum fall-out lambda for membership in a selected root.
fn root_member_threshold(tree: &CondensedTree, params: &HdbscanParams) -> f64 {
    if params.selection_epsilon > 0.0 {
        return 1.0 / params.selection_epsilon;
    }
    let densest = tree.point_lambda.iter().copied().fold(0.0, f64::max);
    densest * ROOT_MEMBER_FRACTION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_cluster_size: usize, allow_single_cluster: bool) -> HdbscanParams {
        HdbscanParams {
            min_cluster_size,
            min_samples: 3,
            selection_epsilon: 0.0,
            allow_single_cluster,
        }
    }

    /// Evenly spaced ring, so no internal split is denser than the whole.
    fn blob(cx: f64, cy: f64, count: usize) -> Vec<Vec<f64>> {
        (0..count)
            .map(|i| {
                let angle = std::f64::consts::TAU * i as f64 / count as f64;
                vec![cx + 0.5 * angle.cos(), cy + 0.5 * angle.sin()]
            })
            .collect()
    }

    #[test]
    fn separates_two_blobs() {
        let mut points = blob(0.0, 0.0, 15);
        points.extend(blob(20.0, 20.0, 15));
        let labels = hdbscan(&points, &params(5, false));

        let first = labels[0].expect("first blob clustered");
        let second = labels[15].expect("second blob clustered");
        assert_ne!(first, second);
        assert!(labels[..15].iter().all(|l| *l == Some(first)));
        assert!(labels[15..].iter().all(|l| *l == Some(second)));
    }

    #[test]
    fn far_outlier_is_noise() {
        let mut points = blob(0.0, 0.0, 12);
        points.extend(blob(10.0, 0.0, 12));
        points.push(vec![500.0, 500.0]);
        let labels = hdbscan(&points, &params(5, false));
        assert_eq!(labels[24], None);
        assert!(labels[0].is_some());
    }

    #[test]
    fn homogeneous_blob_needs_single_cluster_flag() {
        let points = blob(0.0, 0.0, 12);
        let labels = hdbscan(&points, &params(10, true));
        assert!(labels.iter().all(|l| *l == Some(0)));

        let labels = hdbscan(&points, &params(10, false));
        assert!(labels.iter().all(Option::is_none));
    }

    #[test]
    fn single_root_cluster_leaves_far_outlier_as_noise() {
        let mut points = blob(0.0, 0.0, 12);
        points.push(vec![500.0, 500.0]);
        let labels = hdbscan(&points, &params(10, true));
        assert_eq!(labels[12], None);
        assert!(labels[..12].iter().all(|l| *l == Some(0)));
    }

    #[test]
    fn too_few_points_are_all_noise() {
        let points = blob(0.0, 0.0, 3);
        assert_eq!(hdbscan(&points, &params(10, true)), vec![None; 3]);
    }

    #[test]
    fn single_linkage_sizes_accumulate() {
        let edges = vec![(0, 1, 1.0), (1, 2, 2.0), (2, 3, 3.0)];
        let merges = single_linkage(4, &edges);
        assert_eq!(merges.len(), 3);
        assert_eq!(merges[2].size, 4);
        assert_eq!(merges[2].distance, 3.0);
    }
}
