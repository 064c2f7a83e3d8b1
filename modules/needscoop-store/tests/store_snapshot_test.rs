use chrono::{TimeZone, Utc};
use uuid::Uuid;

use std::collections::BTreeMap;

use needscoop_common::{
    ClusterId, ClusterReport, ClusterState, EmbeddingVector, GrowthMetrics, Post, PostStore,
    PublishedRun, RunSummary, ScoreRecord, SignalAnnotation, VectorStore,
};
use needscoop_store::{MemoryPostStore, MemoryVectorStore, ResultBoard, StoreSnapshot};

fn post(id: &str) -> Post {
    Post::builder()
        .id(id)
        .source("bluesky")
        .text(format!("I wish there was a tool for {id}"))
        .created_at(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
        .collected_at(Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap())
        .likes(4)
        .build()
}

fn annotation(post_id: &str, version: &str, primary: Option<&str>) -> SignalAnnotation {
    SignalAnnotation {
        post_id: post_id.to_string(),
        ruleset_version: version.to_string(),
        matches: vec![],
        primary: primary.map(str::to_string),
        excluded: false,
        exclusion_reason: None,
        classified_at: Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap(),
    }
}

fn empty_run() -> PublishedRun {
    PublishedRun {
        run_id: Uuid::new_v4(),
        run_at: Utc::now(),
        corpus_fingerprint: "abc".into(),
        ruleset_version: "v1".into(),
        model_version: "m1".into(),
        reports: vec![],
        summary: RunSummary::default(),
    }
}

fn ranked_report(id: u32) -> ClusterReport {
    ClusterReport {
        rank: id as usize + 1,
        cluster_id: ClusterId(id),
        size: 12,
        score: ScoreRecord {
            cluster_id: ClusterId(id),
            volume: 1.0,
            engagement: 0.5,
            growth: 0.5,
            clarity: 0.5,
            monetization: 0.5,
            composite: 0.6,
            unscored_by_oracle: false,
            oracle: None,
        },
        growth: GrowthMetrics {
            recent: 6,
            prior: 6,
            ratio: Some(1.0),
        },
        categories: BTreeMap::new(),
        quotes: vec![],
        first_post_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        last_post_at: Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap(),
        state: ClusterState::Ranked,
    }
}

#[tokio::test]
async fn snapshot_survives_save_and_load() {
    let vectors = MemoryVectorStore::new();
    let posts = MemoryPostStore::new();
    posts.put_posts(&[post("a"), post("b")]).await.unwrap();
    posts
        .record_annotation(annotation("a", "v1", Some("desire")))
        .await
        .unwrap();
    vectors
        .put(EmbeddingVector {
            post_id: "a".into(),
            vector: vec![0.5, 0.5],
            dimensions: 2,
            model_version: "m1".into(),
            content_hash: "h".into(),
        })
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/needscoop.json");
    StoreSnapshot::capture(&vectors, &posts, None)
        .unwrap()
        .save(&path)
        .unwrap();

    let (vectors2, posts2, published) = StoreSnapshot::load(&path).unwrap().into_stores().unwrap();
    assert!(published.is_none());
    assert_eq!(posts2.posts().await.unwrap().len(), 2);
    assert_eq!(
        posts2.latest_annotation("a").await.unwrap().unwrap().primary.as_deref(),
        Some("desire")
    );
    assert_eq!(vectors2.list("m1").await.unwrap().len(), 1);
}

#[test]
fn missing_snapshot_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = StoreSnapshot::load(&dir.path().join("nope.json")).unwrap();
    assert_eq!(snapshot, StoreSnapshot::default());
}

#[tokio::test]
async fn annotations_are_versioned_history() {
    let posts = MemoryPostStore::new();
    posts.record_annotation(annotation("a", "v1", None)).await.unwrap();
    posts.record_annotation(annotation("a", "v1", Some("desire"))).await.unwrap();
    posts.record_annotation(annotation("a", "v2", Some("complaint"))).await.unwrap();

    let history = posts.annotation_history("a").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].primary.as_deref(), Some("desire"));
    assert_eq!(
        posts.latest_annotation("a").await.unwrap().unwrap().ruleset_version,
        "v2"
    );
}

#[test]
fn board_swaps_whole_runs_and_tracks_staleness() {
    let board = ResultBoard::new();
    board.mark_stale();
    assert!(!board.is_stale(), "nothing published yet");

    let first = empty_run();
    let first_id = first.run_id;
    board.publish(first);
    let held = board.current().unwrap();

    board.mark_stale();
    assert!(board.is_stale());

    board.publish(empty_run());
    assert!(!board.is_stale());
    assert_eq!(held.run_id, first_id, "reader keeps its snapshot");
    assert_ne!(board.current().unwrap().run_id, first_id);
}

#[test]
fn marking_stale_moves_published_reports_to_stale() {
    let board = ResultBoard::new();
    let mut run = empty_run();
    run.reports = vec![ranked_report(0), ranked_report(1)];
    let run_id = run.run_id;
    board.publish(run);
    let before = board.current().unwrap();

    board.mark_stale();
    board.mark_stale();

    let after = board.current().unwrap();
    assert_eq!(after.run_id, run_id);
    assert!(after.reports.iter().all(|r| r.state == ClusterState::Stale));
    assert!(before.reports.iter().all(|r| r.state == ClusterState::Ranked));

    let restored = ResultBoard::with_run(Some(PublishedRun::clone(&after)));
    assert!(restored.is_stale());
}
