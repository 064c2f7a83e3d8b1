use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use needscoop_common::{Post, PostSource};

/// Posts from a JSON-lines export, one post object per line.
pub struct JsonlPostSource {
    path: PathBuf,
}

impl JsonlPostSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PostSource for JsonlPostSource {
    async fn snapshot(&self) -> Result<Vec<Post>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read post feed: {}", self.path.display()))?;

        let mut posts = Vec::new();
        let mut skipped = 0;
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Post>(line) {
                Ok(post) => posts.push(post),
                Err(e) => {
                    skipped += 1;
                    warn!(line = line_no + 1, error = %e, "Skipping malformed post");
                }
            }
        }
        info!(
            path = %self.path.display(),
            posts = posts.len(),
            skipped,
            "Post feed loaded"
        );
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"id":"a","source":"bluesky","text":"I wish there was a good app","created_at":"2025-01-01T00:00:00Z","likes":3}"#,
                "\n\n",
                "{not json}\n",
                r#"{"id":"b","source":"bluesky","text":"so annoying","created_at":"2025-01-02T00:00:00Z"}"#,
                "\n"
            ),
        )
        .unwrap();

        let posts = JsonlPostSource::new(&path).snapshot().await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].likes, 3);
        assert_eq!(posts[1].id, "b");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        assert!(JsonlPostSource::new("/nonexistent/posts.jsonl")
            .snapshot()
            .await
            .is_err());
    }
}
