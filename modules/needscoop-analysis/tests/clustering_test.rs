use needscoop_analysis::clustering::ClusterEngine;
use needscoop_analysis::testing::{test_config, HashEmbedder, TEST_MODEL};
use needscoop_common::{ClusterId, ClusterLabel, Degenerate, EmbeddingVector, NeedScoopError};

fn vectors(embedder: &HashEmbedder, prefix: &str, topic: &str, count: usize) -> Vec<EmbeddingVector> {
    (0..count)
        .map(|i| {
            let text = format!("{topic} variation {i}");
            let vector = embedder.vector_for(&text);
            EmbeddingVector {
                post_id: format!("{prefix}-{i:02}"),
                dimensions: vector.len(),
                vector,
                model_version: TEST_MODEL.to_string(),
                content_hash: format!("{prefix}{i}"),
            }
        })
        .collect()
}

fn two_topics() -> Vec<EmbeddingVector> {
    let embedder = HashEmbedder::new()
        .with_topic("invoice", 0)
        .with_topic("babysitter", 7);
    let mut all = vectors(&embedder, "a", "invoice", 15);
    all.extend(vectors(&embedder, "b", "babysitter", 15));
    all
}

fn engine() -> ClusterEngine {
    ClusterEngine::new(test_config().clustering)
}

#[test]
fn separated_topics_form_separate_clusters() {
    let result = engine().cluster(&two_topics()).unwrap();

    assert_eq!(result.clusters.len(), 2);
    assert_eq!(result.degenerate, None);
    let first = &result.clusters[0];
    let second = &result.clusters[1];
    assert_eq!(first.id, ClusterId(0));
    assert!(first.members.iter().all(|id| id.starts_with("a-")));
    assert!(second.members.iter().all(|id| id.starts_with("b-")));
    assert_eq!(first.size, 15);
    assert_eq!(second.size, 15);
}

#[test]
fn every_post_gets_exactly_one_label() {
    let input = two_topics();
    let result = engine().cluster(&input).unwrap();

    assert_eq!(result.labels.len(), input.len());
    let clustered: usize = result.clusters.iter().map(|c| c.size).sum();
    assert_eq!(clustered + result.noise_count(), input.len());
    for cluster in &result.clusters {
        let mut sorted = cluster.members.clone();
        sorted.sort();
        assert_eq!(sorted, cluster.members);
        for id in &cluster.members {
            assert_eq!(result.label_of(id), Some(ClusterLabel::Cluster(cluster.id)));
        }
        assert_eq!(cluster.centroid.len(), input[0].vector.len());
    }
}

#[test]
fn identical_input_gives_identical_result() {
    let first = engine().cluster(&two_topics()).unwrap();
    let second = engine().cluster(&two_topics()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn input_order_does_not_matter() {
    let forward = two_topics();
    let mut reversed = forward.clone();
    reversed.reverse();
    assert_eq!(
        engine().cluster(&forward).unwrap(),
        engine().cluster(&reversed).unwrap()
    );
}

#[test]
fn corpus_below_min_cluster_size_is_all_noise() {
    let embedder = HashEmbedder::new();
    let input = vectors(&embedder, "p", "anything", 3);
    let result = engine().cluster(&input).unwrap();

    assert!(result.clusters.is_empty());
    assert_eq!(result.noise_count(), 3);
    assert_eq!(result.degenerate, Some(Degenerate::AllNoise));
}

#[test]
fn empty_input_is_all_noise() {
    let result = engine().cluster(&[]).unwrap();
    assert!(result.labels.is_empty());
    assert_eq!(result.degenerate, Some(Degenerate::AllNoise));
}

#[test]
fn rejects_duplicate_posts_and_mixed_dimensions() {
    let mut input = two_topics();
    input.push(input[0].clone());
    assert!(matches!(
        engine().cluster(&input),
        Err(NeedScoopError::Validation(_))
    ));

    let mut input = two_topics();
    input[3].vector.push(0.5);
    input[3].dimensions += 1;
    assert!(matches!(
        engine().cluster(&input),
        Err(NeedScoopError::Validation(_))
    ));
}
