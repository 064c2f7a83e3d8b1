//! Need-signal detection.
//!
//! Classification is a pure function of (text, rule book): no I/O, no clock.
//! Timestamps and versions are attached by [`SignalDetector::annotate`].

pub mod rules;
pub mod source;

use chrono::{DateTime, Utc};

use needscoop_common::{Post, SignalAnnotation, SignalMatch};

pub use rules::RuleBook;
pub use source::FileRuleSource;

/// Boost applied per additional matched pattern within one category.
const MULTI_PATTERN_BOOST: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum Exclusion {
    TooShort { chars: usize, min: usize },
    TooLong { chars: usize, max: usize },
    Pattern(String),
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exclusion::TooShort { chars, min } => write!(f, "too short ({chars} < {min} chars)"),
            Exclusion::TooLong { chars, max } => write!(f, "too long ({chars} > {max} chars)"),
            Exclusion::Pattern(p) => write!(f, "matched exclusion '{p}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatch {
    pub category: String,
    pub patterns: Vec<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    /// Matched categories in declaration order.
    pub matches: Vec<CategoryMatch>,
    pub primary: Option<String>,
    pub exclusion: Option<Exclusion>,
}

impl Classification {
    pub fn is_excluded(&self) -> bool {
        self.exclusion.is_some()
    }
}

pub struct SignalDetector<'r> {
    rules: &'r RuleBook,
}

impl<'r> SignalDetector<'r> {
    pub fn new(rules: &'r RuleBook) -> Self {
        Self { rules }
    }

    pub fn ruleset_version(&self) -> &str {
        self.rules.version()
    }

    pub fn classify(&self, text: &str, language: Option<&str>) -> Classification {
        let set = self.rules.for_language(language);

        let chars = text.trim().chars().count();
        if chars < set.min_length {
            return Classification {
                exclusion: Some(Exclusion::TooShort {
                    chars,
                    min: set.min_length,
                }),
                ..Default::default()
            };
        }
        if chars > set.max_length {
            return Classification {
                exclusion: Some(Exclusion::TooLong {
                    chars,
                    max: set.max_length,
                }),
                ..Default::default()
            };
        }
        if let Some(hit) = set.exclusions.iter().find(|p| p.regex.is_match(text)) {
            return Classification {
                exclusion: Some(Exclusion::Pattern(hit.source.clone())),
                ..Default::default()
            };
        }

        let mut matches = Vec::new();
        for category in &set.categories {
            let hits: Vec<_> = category
                .patterns
                .iter()
                .filter(|p| p.regex.is_match(text))
                .collect();
            if hits.is_empty() {
                continue;
            }
            let top = hits.iter().map(|p| p.weight).fold(f64::MIN, f64::max);
            let weight = top * (1.0 + MULTI_PATTERN_BOOST * (hits.len() - 1) as f64);
            matches.push(CategoryMatch {
                category: category.name.clone(),
                patterns: hits.iter().map(|p| p.source.clone()).collect(),
                weight,
            });
        }

        // Strict comparison keeps the earliest declared category on ties.
        let mut primary: Option<&CategoryMatch> = None;
        for m in &matches {
            if primary.map_or(true, |best| m.weight > best.weight) {
                primary = Some(m);
            }
        }
        let primary = primary.map(|m| m.category.clone());

        Classification {
            matches,
            primary,
            exclusion: None,
        }
    }

    pub fn annotate(&self, post: &Post, classified_at: DateTime<Utc>) -> SignalAnnotation {
        let classification = self.classify(&post.text, post.language.as_deref());
        SignalAnnotation {
            post_id: post.id.clone(),
            ruleset_version: self.rules.version().to_string(),
            matches: classification
                .matches
                .into_iter()
                .map(|m| SignalMatch {
                    post_id: post.id.clone(),
                    category: m.category,
                    patterns: m.patterns,
                    weight: m.weight,
                })
                .collect(),
            primary: classification.primary,
            excluded: classification.exclusion.is_some(),
            exclusion_reason: classification.exclusion.map(|e| e.to_string()),
            classified_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use needscoop_common::RuleBookConfig;

    fn book() -> RuleBook {
        let config: RuleBookConfig = toml::from_str(
            r#"
            [default]
            min_length = 10
            max_length = 200
            exclusions = ["follow for follow", { pattern = "https?://\\S+\\s+https?://", regex = true }]

            [[default.categories]]
            name = "desire"
            weight = 1.0
            patterns = ["I wish there was", "I wish someone would"]

            [[default.categories]]
            name = "frustration"
            weight = 1.0
            patterns = ["so annoying", { pattern = "why (is|isn't) there", regex = true, weight = 1.5 }]

            [[default.categories]]
            name = "complaint"
            weight = 0.5
            patterns = ["worst"]
            "#,
        )
        .unwrap();
        RuleBook::compile(&config).unwrap()
    }

    #[test]
    fn matching_is_case_insensitive() {
        let book = book();
        let c = SignalDetector::new(&book).classify("i WISH THERE WAS a budgeting app", None);
        assert_eq!(c.primary.as_deref(), Some("desire"));
        assert_eq!(c.matches[0].patterns, vec!["I wish there was"]);
    }

    #[test]
    fn no_match_is_unclassified_not_excluded() {
        let book = book();
        let c = SignalDetector::new(&book).classify("Lovely weather in the park today", None);
        assert!(c.primary.is_none());
        assert!(c.matches.is_empty());
        assert!(!c.is_excluded());
    }

    #[test]
    fn multiple_patterns_boost_category_weight() {
        let book = book();
        let c = SignalDetector::new(&book)
            .classify("I wish there was a fix, I wish someone would build it", None);
        assert!((c.matches[0].weight - 1.1).abs() < 1e-9);
    }

    #[test]
    fn ties_go_to_the_earlier_category() {
        let book = book();
        let c = SignalDetector::new(&book)
            .classify("I wish there was a way, this is so annoying", None);
        assert_eq!(c.matches.len(), 2);
        assert_eq!(c.primary.as_deref(), Some("desire"));
    }

    #[test]
    fn pattern_weight_overrides_category_weight() {
        let book = book();
        let c = SignalDetector::new(&book)
            .classify("I wish there was one. Why isn't there an app?", None);
        assert_eq!(c.primary.as_deref(), Some("frustration"));
    }

    #[test]
    fn exclusions_and_length_bounds() {
        let book = book();
        let detector = SignalDetector::new(&book);
        assert!(matches!(
            detector.classify("too short", None).exclusion,
            Some(Exclusion::TooShort { .. })
        ));
        assert!(matches!(
            detector.classify(&"x".repeat(201), None).exclusion,
            Some(Exclusion::TooLong { .. })
        ));
        let spam = detector.classify("I wish there was more! Follow for follow", None);
        assert!(matches!(spam.exclusion, Some(Exclusion::Pattern(_))));
        assert!(spam.primary.is_none());
    }

    #[test]
    fn classification_is_idempotent() {
        let book = book();
        let detector = SignalDetector::new(&book);
        let text = "Why is there no decent note app? So annoying.";
        assert_eq!(detector.classify(text, None), detector.classify(text, None));
    }
}
