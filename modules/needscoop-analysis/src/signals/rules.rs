use std::collections::{BTreeMap, HashSet};

use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

use needscoop_common::{NeedScoopError, PatternEntry, RuleBookConfig, RuleSetConfig};

/// A validated, compiled rule book. Construction is the only place rule
/// errors surface; classification itself cannot fail.
#[derive(Debug, Clone)]
pub struct RuleBook {
    version: String,
    default: CompiledRuleSet,
    languages: BTreeMap<String, CompiledRuleSet>,
}

#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    pub(crate) min_length: usize,
    pub(crate) max_length: usize,
    pub(crate) exclusions: Vec<CompiledPattern>,
    pub(crate) categories: Vec<CompiledCategory>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledCategory {
    pub name: String,
    pub patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledPattern {
    pub source: String,
    pub regex: Regex,
    pub weight: f64,
}

impl RuleBook {
    pub fn compile(config: &RuleBookConfig) -> Result<Self, NeedScoopError> {
        let default = compile_set("default", &config.default)?;
        let mut languages = BTreeMap::new();
        for (lang, set) in &config.languages {
            let key = lang.trim().to_lowercase();
            if key.is_empty() {
                return Err(rule_err("language keys must not be empty"));
            }
            if languages.contains_key(&key) {
                return Err(rule_err(&format!(
                    "duplicate language '{key}' (keys are case-insensitive)"
                )));
            }
            languages.insert(key, compile_set(lang, set)?);
        }
        Ok(Self {
            version: ruleset_version(config)?,
            default,
            languages,
        })
    }

    /// Content hash of the rule configuration. Annotations are keyed by it.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rules for a language tag. `pt-BR` falls back to `pt`, then to the default set.
    pub fn for_language(&self, language: Option<&str>) -> &CompiledRuleSet {
        let Some(tag) = language.map(|l| l.trim().to_lowercase()) else {
            return &self.default;
        };
        if let Some(set) = self.languages.get(&tag) {
            return set;
        }
        tag.split(['-', '_'])
            .next()
            .and_then(|primary| self.languages.get(primary))
            .unwrap_or(&self.default)
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.default
            .categories
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }
}

fn ruleset_version(config: &RuleBookConfig) -> Result<String, NeedScoopError> {
    let canonical = serde_json::to_vec(config)
        .map_err(|e| NeedScoopError::Config(format!("rule set is not serializable: {e}")))?;
    let digest = Sha256::digest(&canonical);
    Ok(hex::encode(&digest[..8]))
}

fn compile_set(scope: &str, config: &RuleSetConfig) -> Result<CompiledRuleSet, NeedScoopError> {
    if config.min_length > config.max_length {
        return Err(rule_err(&format!(
            "[{scope}] min_length {} exceeds max_length {}",
            config.min_length, config.max_length
        )));
    }

    let exclusions = config
        .exclusions
        .iter()
        .map(|p| compile_pattern(scope, "exclusions", p, 1.0))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut categories = Vec::with_capacity(config.categories.len());
    for category in &config.categories {
        let name = category.name.trim();
        if name.is_empty() {
            return Err(rule_err(&format!("[{scope}] category name must not be empty")));
        }
        if !seen.insert(name.to_string()) {
            return Err(rule_err(&format!("[{scope}] duplicate category '{name}'")));
        }
        check_weight(scope, name, category.weight)?;
        if category.patterns.is_empty() {
            return Err(rule_err(&format!(
                "[{scope}] category '{name}' has no patterns"
            )));
        }
        let patterns = category
            .patterns
            .iter()
            .map(|p| compile_pattern(scope, name, p, category.weight))
            .collect::<Result<Vec<_>, _>>()?;
        categories.push(CompiledCategory {
            name: name.to_string(),
            patterns,
        });
    }

    Ok(CompiledRuleSet {
        min_length: config.min_length,
        max_length: config.max_length,
        exclusions,
        categories,
    })
}

fn compile_pattern(
    scope: &str,
    owner: &str,
    entry: &PatternEntry,
    default_weight: f64,
) -> Result<CompiledPattern, NeedScoopError> {
    let source = entry.source();
    if source.trim().is_empty() {
        return Err(rule_err(&format!("[{scope}] '{owner}' has an empty pattern")));
    }
    let weight = entry.weight().unwrap_or(default_weight);
    check_weight(scope, owner, weight)?;

    let expr = if entry.is_regex() {
        source.to_string()
    } else {
        regex::escape(source)
    };
    let regex = RegexBuilder::new(&expr)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            rule_err(&format!(
                "[{scope}] '{owner}' pattern '{source}' does not compile: {e}"
            ))
        })?;

    Ok(CompiledPattern {
        source: source.to_string(),
        regex,
        weight,
    })
}

fn check_weight(scope: &str, owner: &str, weight: f64) -> Result<(), NeedScoopError> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(rule_err(&format!(
            "[{scope}] '{owner}' weight must be a positive number (got {weight})"
        )))
    }
}

fn rule_err(msg: &str) -> NeedScoopError {
    NeedScoopError::Config(format!("signal rules: {msg}"))
}
