use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use needscoop_common::{PublishedRun, ReportBuilder};

/// Writes the ranked run as pretty-printed JSON for the report renderer.
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportBuilder for JsonReportWriter {
    async fn build(&self, run: &PublishedRun) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_vec_pretty(run).context("Failed to serialize run")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write report: {}", self.path.display()))?;
        info!(path = %self.path.display(), clusters = run.reports.len(), "Report written");
        Ok(())
    }
}
