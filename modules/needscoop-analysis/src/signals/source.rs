use std::path::PathBuf;

use async_trait::async_trait;

use needscoop_common::{NeedScoopError, RuleBookConfig, RuleSource};

/// Signal rules from a TOML file.
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleSource for FileRuleSource {
    async fn load_rules(&self) -> Result<RuleBookConfig, NeedScoopError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            NeedScoopError::Config(format!(
                "Failed to read signal rules {}: {e}",
                self.path.display()
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            NeedScoopError::Config(format!(
                "Failed to parse signal rules {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_config_error() {
        let source = FileRuleSource::new("/nonexistent/signals.toml");
        assert!(matches!(
            source.load_rules().await,
            Err(NeedScoopError::Config(_))
        ));
    }

    #[tokio::test]
    async fn loads_rules_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.toml");
        std::fs::write(
            &path,
            "[default]\n[[default.categories]]\nname = \"desire\"\nweight = 1.0\npatterns = [\"I wish\"]\n",
        )
        .unwrap();
        let rules = FileRuleSource::new(&path).load_rules().await.unwrap();
        assert_eq!(rules.default.categories[0].name, "desire");
    }
}
