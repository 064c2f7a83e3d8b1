use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Signal rules keyed by language, with a default set for everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleBookConfig {
    pub default: RuleSetConfig,
    #[serde(default)]
    pub languages: BTreeMap<String, RuleSetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSetConfig {
    /// Minimum text length in characters.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// Maximum text length in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Spam and bot markers. Any match excludes the post.
    #[serde(default)]
    pub exclusions: Vec<PatternEntry>,
    /// Declaration order breaks ties between equally weighted categories.
    pub categories: Vec<CategoryConfig>,
}

fn default_min_length() -> usize {
    20
}

fn default_max_length() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub weight: f64,
    pub patterns: Vec<PatternEntry>,
}

/// A bare string is a literal phrase. The table form allows a regex and a
/// per-pattern weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternEntry {
    Literal(String),
    Detailed {
        pattern: String,
        #[serde(default)]
        regex: bool,
        #[serde(default)]
        weight: Option<f64>,
    },
}

impl PatternEntry {
    pub fn source(&self) -> &str {
        match self {
            PatternEntry::Literal(s) => s,
            PatternEntry::Detailed { pattern, .. } => pattern,
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, PatternEntry::Detailed { regex: true, .. })
    }

    pub fn weight(&self) -> Option<f64> {
        match self {
            PatternEntry::Literal(_) => None,
            PatternEntry::Detailed { weight, .. } => *weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_pattern_forms() {
        let book: RuleBookConfig = toml::from_str(
            r#"
            [default]
            exclusions = ["follow for follow"]

            [[default.categories]]
            name = "desire"
            weight = 1.0
            patterns = [
                "I wish there was",
                { pattern = "why (is|isn't) there", regex = true, weight = 1.5 },
            ]

            [[languages.es.categories]]
            name = "deseo"
            weight = 1.0
            patterns = ["ojalá hubiera"]
            "#,
        )
        .unwrap();

        let default = &book.default;
        assert_eq!(default.min_length, 20);
        assert_eq!(default.max_length, 1000);
        assert_eq!(default.categories[0].patterns.len(), 2);
        assert!(!default.categories[0].patterns[0].is_regex());
        assert!(default.categories[0].patterns[1].is_regex());
        assert_eq!(default.categories[0].patterns[1].weight(), Some(1.5));
        assert_eq!(book.languages["es"].categories[0].name, "deseo");
    }
}
