use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use needscoop_common::{
    EmbeddingVector, Neighbor, Post, PostStore, QuarantineRecord, SignalAnnotation, VectorFilter,
    VectorStore,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("store lock poisoned"))
}

/// Cosine distance `1 - cos(a, b)`. Zero-norm vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0) as f32
}

// ---------------------------------------------------------------------------
// MemoryVectorStore
// ---------------------------------------------------------------------------

/// Vectors keyed by (post id, model version). A second write for the same key
/// is rejected.
#[derive(Default)]
pub struct MemoryVectorStore {
    vectors: RwLock<HashMap<(String, String), EmbeddingVector>>,
    writes: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vectors(vectors: Vec<EmbeddingVector>) -> Result<Self> {
        let store = Self::new();
        {
            let mut map = write(&store.vectors)?;
            for v in vectors {
                map.insert((v.post_id.clone(), v.model_version.clone()), v);
            }
        }
        Ok(store)
    }

    /// Successful `put` calls since construction.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        read(&self.vectors).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored vector, sorted by (model, post id).
    pub fn export(&self) -> Result<Vec<EmbeddingVector>> {
        let map = read(&self.vectors)?;
        let mut all: Vec<EmbeddingVector> = map.values().cloned().collect();
        all.sort_by(|a, b| {
            (a.model_version.as_str(), a.post_id.as_str())
                .cmp(&(b.model_version.as_str(), b.post_id.as_str()))
        });
        Ok(all)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn put(&self, vector: EmbeddingVector) -> Result<()> {
        if vector.vector.len() != vector.dimensions {
            bail!(
                "vector for {} has {} values but declares {} dimensions",
                vector.post_id,
                vector.vector.len(),
                vector.dimensions
            );
        }
        let key = (vector.post_id.clone(), vector.model_version.clone());
        let mut map = write(&self.vectors)?;
        if map.contains_key(&key) {
            bail!(
                "embedding for post {} under model {} already stored",
                key.0,
                key.1
            );
        }
        map.insert(key, vector);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_many(
        &self,
        post_ids: &[String],
        model_version: &str,
    ) -> Result<Vec<EmbeddingVector>> {
        let map = read(&self.vectors)?;
        Ok(post_ids
            .iter()
            .filter_map(|id| map.get(&(id.clone(), model_version.to_string())).cloned())
            .collect())
    }

    async fn list(&self, model_version: &str) -> Result<Vec<EmbeddingVector>> {
        let map = read(&self.vectors)?;
        let mut found: Vec<EmbeddingVector> = map
            .values()
            .filter(|v| v.model_version == model_version)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        Ok(found)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<Neighbor>> {
        let map = read(&self.vectors)?;
        let mut neighbors: Vec<Neighbor> = map
            .values()
            .filter(|v| v.model_version == filter.model_version && filter.allows(&v.post_id))
            .filter(|v| v.vector.len() == vector.len())
            .map(|v| Neighbor {
                post_id: v.post_id.clone(),
                distance: cosine_distance(vector, &v.vector),
            })
            .collect();
        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

// ---------------------------------------------------------------------------
// MemoryPostStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PostTables {
    posts: BTreeMap<String, Post>,
    /// Annotation history per post, oldest first.
    annotations: BTreeMap<String, Vec<SignalAnnotation>>,
    quarantine: BTreeMap<(String, String), QuarantineRecord>,
}

#[derive(Default)]
pub struct MemoryPostStore {
    tables: RwLock<PostTables>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        posts: Vec<Post>,
        annotations: Vec<SignalAnnotation>,
        quarantine: Vec<QuarantineRecord>,
    ) -> Result<Self> {
        let store = Self::new();
        {
            let mut t = write(&store.tables)?;
            for p in posts {
                t.posts.insert(p.id.clone(), p);
            }
            for a in annotations {
                t.annotations.entry(a.post_id.clone()).or_default().push(a);
            }
            for q in quarantine {
                t.quarantine
                    .insert((q.post_id.clone(), q.model_version.clone()), q);
            }
        }
        Ok(store)
    }

    /// Posts, annotation history, and quarantine records in key order.
    pub fn export(
        &self,
    ) -> Result<(Vec<Post>, Vec<SignalAnnotation>, Vec<QuarantineRecord>)> {
        let t = read(&self.tables)?;
        Ok((
            t.posts.values().cloned().collect(),
            t.annotations.values().flatten().cloned().collect(),
            t.quarantine.values().cloned().collect(),
        ))
    }

    /// Every recorded annotation for a post, oldest first.
    pub fn annotation_history(&self, post_id: &str) -> Result<Vec<SignalAnnotation>> {
        let t = read(&self.tables)?;
        Ok(t.annotations.get(post_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn put_posts(&self, posts: &[Post]) -> Result<()> {
        let mut t = write(&self.tables)?;
        for p in posts {
            t.posts.entry(p.id.clone()).or_insert_with(|| p.clone());
        }
        Ok(())
    }

    async fn posts(&self) -> Result<Vec<Post>> {
        Ok(read(&self.tables)?.posts.values().cloned().collect())
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        Ok(read(&self.tables)?.posts.get(post_id).cloned())
    }

    async fn record_annotation(&self, annotation: SignalAnnotation) -> Result<()> {
        let mut t = write(&self.tables)?;
        let history = t.annotations.entry(annotation.post_id.clone()).or_default();
        // Re-classifying under the same rule set replaces rather than appends.
        let same_version = history
            .last()
            .is_some_and(|last| last.ruleset_version == annotation.ruleset_version);
        if same_version {
            history.pop();
        }
        history.push(annotation);
        Ok(())
    }

    async fn latest_annotation(&self, post_id: &str) -> Result<Option<SignalAnnotation>> {
        let t = read(&self.tables)?;
        Ok(t.annotations.get(post_id).and_then(|h| h.last().cloned()))
    }

    async fn mark_quarantined(&self, record: QuarantineRecord) -> Result<()> {
        let mut t = write(&self.tables)?;
        t.quarantine
            .insert((record.post_id.clone(), record.model_version.clone()), record);
        Ok(())
    }

    async fn clear_quarantine(&self, post_id: &str, model_version: &str) -> Result<()> {
        let mut t = write(&self.tables)?;
        t.quarantine
            .remove(&(post_id.to_string(), model_version.to_string()));
        Ok(())
    }

    async fn quarantined(&self, model_version: &str) -> Result<Vec<QuarantineRecord>> {
        let t = read(&self.tables)?;
        Ok(t.quarantine
            .values()
            .filter(|q| q.model_version == model_version)
            .cloned()
            .collect())
    }
}
