use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use needscoop_common::{EmbeddingVector, Post, PublishedRun, QuarantineRecord, SignalAnnotation};

use crate::memory::{MemoryPostStore, MemoryVectorStore};

/// Everything the in-memory stores hold, as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub annotations: Vec<SignalAnnotation>,
    #[serde(default)]
    pub quarantine: Vec<QuarantineRecord>,
    #[serde(default)]
    pub vectors: Vec<EmbeddingVector>,
    #[serde(default)]
    pub published: Option<PublishedRun>,
}

impl StoreSnapshot {
    pub fn capture(
        vectors: &MemoryVectorStore,
        posts: &MemoryPostStore,
        published: Option<PublishedRun>,
    ) -> Result<Self> {
        let (posts, annotations, quarantine) = posts.export()?;
        Ok(Self {
            posts,
            annotations,
            quarantine,
            vectors: vectors.export()?,
            published,
        })
    }

    pub fn into_stores(self) -> Result<(MemoryVectorStore, MemoryPostStore, Option<PublishedRun>)> {
        let vectors = MemoryVectorStore::from_vectors(self.vectors)?;
        let posts = MemoryPostStore::from_parts(self.posts, self.annotations, self.quarantine)?;
        Ok((vectors, posts, self.published))
    }

    /// Read a snapshot. A missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
        info!(
            path = %path.display(),
            posts = snapshot.posts.len(),
            vectors = snapshot.vectors.len(),
            "Snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Write through a temp file in the same directory, then rename, so a
    /// crash never leaves a truncated snapshot behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer(&mut tmp, self).context("Failed to serialize snapshot")?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
        Ok(())
    }
}
