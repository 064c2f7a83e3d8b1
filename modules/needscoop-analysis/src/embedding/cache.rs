use std::collections::HashMap;

use sha2::{Digest, Sha256};

use needscoop_common::EmbeddingVector;

/// Collapse Unicode whitespace runs to one space and trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex of the normalized text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(normalize(text).as_bytes()))
}

/// Vectors by content hash for a single model version.
pub struct ContentCache {
    model_version: String,
    vectors: HashMap<String, Vec<f32>>,
}

impl ContentCache {
    pub fn new(model_version: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            vectors: HashMap::new(),
        }
    }

    /// Seed from vectors already persisted. Vectors for other models are ignored.
    pub fn warm<'a>(&mut self, stored: impl IntoIterator<Item = &'a EmbeddingVector>) {
        for v in stored {
            if v.model_version == self.model_version {
                self.vectors
                    .entry(v.content_hash.clone())
                    .or_insert_with(|| v.vector.clone());
            }
        }
    }

    pub fn get(&self, hash: &str) -> Option<&Vec<f32>> {
        self.vectors.get(hash)
    }

    pub fn insert(&mut self, hash: String, vector: Vec<f32>) {
        self.vectors.entry(hash).or_insert(vector);
    }

    /// Dimensionality of any cached vector.
    pub fn dimensions(&self) -> Option<usize> {
        self.vectors.values().next().map(Vec::len)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}
