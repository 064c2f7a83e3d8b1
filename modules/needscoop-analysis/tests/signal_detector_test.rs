use chrono::Utc;

use needscoop_analysis::signals::{Exclusion, RuleBook, SignalDetector};
use needscoop_analysis::testing::{post, rule_book, TEST_RULES};
use needscoop_common::RuleBookConfig;

#[test]
fn desire_phrase_is_primary() {
    let rules = rule_book();
    let detector = SignalDetector::new(&rules);
    let c = detector.classify("I wish there was an app that reminds me to water plants", None);
    assert_eq!(c.primary.as_deref(), Some("desire"));
    assert!(!c.is_excluded());
}

#[test]
fn heavier_category_wins_over_declaration_order() {
    let rules = rule_book();
    let detector = SignalDetector::new(&rules);
    // desire (1.0) beats complaint (0.8) regardless of which phrase comes first.
    let c = detector.classify("worst week ever, I wish someone would fix expense reports", None);
    assert_eq!(c.matches.len(), 2);
    assert_eq!(c.primary.as_deref(), Some("desire"));
}

#[test]
fn multiple_patterns_boost_a_category() {
    let rules = rule_book();
    let detector = SignalDetector::new(&rules);
    let c = detector.classify(
        "why isn't there a decent invoicing tool, this is so annoying and the worst",
        None,
    );
    let frustration = c
        .matches
        .iter()
        .find(|m| m.category == "frustration")
        .expect("frustration matched");
    assert_eq!(frustration.patterns.len(), 2);
    assert!((frustration.weight - 0.99).abs() < 1e-9);
    assert_eq!(c.primary.as_deref(), Some("frustration"));
}

#[test]
fn exclusions_and_length_bounds() {
    let rules = rule_book();
    let detector = SignalDetector::new(&rules);

    let spam = detector.classify("GIVEAWAY! I wish there was a free phone for everyone", None);
    assert_eq!(spam.exclusion, Some(Exclusion::Pattern("giveaway".into())));
    assert!(spam.primary.is_none());

    let short = detector.classify("   I wish there   ", None);
    assert!(matches!(short.exclusion, Some(Exclusion::TooShort { .. })));

    let long = detector.classify(&"I wish there was ".repeat(100), None);
    assert!(matches!(long.exclusion, Some(Exclusion::TooLong { .. })));
}

#[test]
fn unmatched_post_is_unclassified_but_kept() {
    let rules = rule_book();
    let detector = SignalDetector::new(&rules);
    let c = detector.classify("Lovely morning walk along the river today", None);
    assert!(c.matches.is_empty());
    assert!(c.primary.is_none());
    assert!(!c.is_excluded());
}

#[test]
fn language_specific_rules_fall_back_by_primary_subtag() {
    let toml_src = format!(
        "{TEST_RULES}\n{}",
        r#"
[languages.pt]
min_length = 10

[[languages.pt.categories]]
name = "desejo"
weight = 1.0
patterns = ["quem dera"]
"#
    );
    let config: RuleBookConfig = toml::from_str(&toml_src).unwrap();
    let rules = RuleBook::compile(&config).unwrap();
    let detector = SignalDetector::new(&rules);

    let text = "quem dera existisse um app de receitas";
    assert_eq!(detector.classify(text, Some("pt-BR")).primary.as_deref(), Some("desejo"));
    assert_eq!(detector.classify(text, Some("en")).primary, None);
}

#[test]
fn annotation_carries_ruleset_version() {
    let rules = rule_book();
    let detector = SignalDetector::new(&rules);
    let p = post("p-1", "I wish there was a calmer email client", Utc::now());
    let annotation = detector.annotate(&p, Utc::now());

    assert_eq!(annotation.post_id, "p-1");
    assert_eq!(annotation.ruleset_version, rules.version());
    assert_eq!(annotation.primary.as_deref(), Some("desire"));
    assert_eq!(annotation.matches[0].post_id, "p-1");
    assert!(annotation.is_classified());
}

#[test]
fn version_changes_with_rules_and_is_stable_otherwise() {
    let a = rule_book();
    let b = rule_book();
    assert_eq!(a.version(), b.version());
    assert_eq!(a.version().len(), 16);

    let changed = TEST_RULES.replace("so annoying", "so frustrating");
    let config: RuleBookConfig = toml::from_str(&changed).unwrap();
    let c = RuleBook::compile(&config).unwrap();
    assert_ne!(a.version(), c.version());
}

#[test]
fn invalid_regex_is_a_config_error() {
    let broken = TEST_RULES.replace("why (is|isn't) there", "why (is|isn't there");
    let config: RuleBookConfig = toml::from_str(&broken).unwrap();
    let err = RuleBook::compile(&config).unwrap_err();
    assert!(matches!(err, needscoop_common::NeedScoopError::Config(_)));
}
