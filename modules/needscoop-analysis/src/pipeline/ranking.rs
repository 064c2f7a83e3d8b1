use std::cmp::Ordering;

use sha2::{Digest, Sha256};

use needscoop_common::{EmbeddingVector, ScoreRecord};

/// Composite descending, then cluster size descending, then cluster id ascending.
pub fn rank(mut scored: Vec<(ScoreRecord, usize)>) -> Vec<(ScoreRecord, usize)> {
    scored.sort_by(|(a, size_a), (b, size_b)| {
        b.composite
            .total_cmp(&a.composite)
            .then_with(|| size_b.cmp(size_a))
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
    scored
}

/// SHA-256 over `post_id:content_hash` lines in post-id order.
pub fn corpus_fingerprint(vectors: &[EmbeddingVector]) -> String {
    let mut entries: Vec<(&str, &str)> = vectors
        .iter()
        .map(|v| (v.post_id.as_str(), v.content_hash.as_str()))
        .collect();
    entries.sort_by(|a, b| match a.0.cmp(b.0) {
        Ordering::Equal => a.1.cmp(b.1),
        other => other,
    });
    let mut hasher = Sha256::new();
    for (id, hash) in entries {
        hasher.update(id.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use needscoop_common::ClusterId;

    fn record(id: u32, composite: f64) -> ScoreRecord {
        ScoreRecord {
            cluster_id: ClusterId(id),
            volume: 0.0,
            engagement: 0.0,
            growth: 0.0,
            clarity: 50.0,
            monetization: 50.0,
            composite,
            unscored_by_oracle: false,
            oracle: None,
        }
    }

    #[test]
    fn ranking_tiebreaks() {
        let ranked = rank(vec![
            (record(0, 40.0), 10),
            (record(1, 70.0), 10),
            (record(2, 40.0), 20),
            (record(3, 40.0), 10),
        ]);
        let ids: Vec<u32> = ranked.iter().map(|(r, _)| r.cluster_id.0).collect();
        assert_eq!(ids, vec![1, 2, 0, 3]);
    }

    #[test]
    fn fingerprint_ignores_input_order() {
        let v = |id: &str, h: &str| EmbeddingVector {
            post_id: id.into(),
            vector: vec![0.0],
            dimensions: 1,
            model_version: "m".into(),
            content_hash: h.into(),
        };
        let a = corpus_fingerprint(&[v("a", "1"), v("b", "2")]);
        let b = corpus_fingerprint(&[v("b", "2"), v("a", "1")]);
        let c = corpus_fingerprint(&[v("a", "1"), v("b", "3")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
