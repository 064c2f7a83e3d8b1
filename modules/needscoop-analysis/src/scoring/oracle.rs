use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

use needscoop_common::{Cluster, NeedScoopError, OracleConfig, OracleRequest, Post};

const SYSTEM_PROMPT: &str = r#"You are a product analyst. You are given a cluster of short social-media posts in which people express a frustration, desire, or complaint. Judge the product opportunity the cluster represents.

Score each dimension from 0 to 100:
- clarity: how clearly the posts describe one specific, actionable problem
- market: how large the affected audience appears to be
- monetization: how likely people with this problem are to pay for a solution
- competition: how crowded the existing solution space is (100 = saturated)
- feasibility: how buildable a solution is for a small team

Respond with a single JSON object matching the provided schema and nothing else."#;

/// The answer the oracle must produce.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct OracleVerdict {
    /// 0-100: how specific and actionable the underlying problem is.
    pub clarity: f64,
    /// 0-100: apparent size of the affected audience.
    pub market: f64,
    /// 0-100: willingness to pay for a solution.
    pub monetization: f64,
    /// 0-100: saturation of existing solutions.
    pub competition: f64,
    /// 0-100: buildability for a small team.
    pub feasibility: f64,
    /// One or two sentences explaining the scores.
    pub rationale: String,
}

/// Up to `sample_size` member texts, shortest first, ties by post id.
pub fn representative_samples(members: &[&Post], sample_size: usize, max_chars: usize) -> Vec<String> {
    let mut ordered: Vec<&Post> = members.to_vec();
    ordered.sort_by(|a, b| {
        a.text
            .chars()
            .count()
            .cmp(&b.text.chars().count())
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
        .into_iter()
        .take(sample_size)
        .map(|p| truncate_chars(p.text.trim(), max_chars).to_string())
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

pub fn build_request(
    cluster: &Cluster,
    members: &[&Post],
    categories: &BTreeMap<String, usize>,
    config: &OracleConfig,
) -> OracleRequest {
    let first = members.iter().map(|p| p.created_at).min();
    let last = members.iter().map(|p| p.created_at).max();
    let likes: u64 = members.iter().map(|p| p.likes).sum();
    let reposts: u64 = members.iter().map(|p| p.reposts).sum();
    let replies: u64 = members.iter().map(|p| p.replies).sum();

    let mut prompt = String::new();
    prompt.push_str(&format!("Cluster size: {} posts\n", cluster.size));
    if let (Some(first), Some(last)) = (first, last) {
        prompt.push_str(&format!(
            "Time span: {} to {}\n",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ));
    }
    prompt.push_str(&format!(
        "Engagement: {likes} likes, {reposts} reposts, {replies} replies\n"
    ));
    if !categories.is_empty() {
        let histogram: Vec<String> = categories.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        prompt.push_str(&format!("Signal categories: {}\n", histogram.join(", ")));
    }

    prompt.push_str("\nRepresentative posts:\n");
    for (i, sample) in representative_samples(members, config.sample_size, config.sample_max_chars)
        .iter()
        .enumerate()
    {
        prompt.push_str(&format!("{}. {}\n", i + 1, sample));
    }

    let schema = serde_json::to_string_pretty(&schema_for!(OracleVerdict)).unwrap_or_default();
    prompt.push_str(&format!("\nRespond with JSON matching this schema:\n{schema}\n"));

    OracleRequest {
        cluster_id: cluster.id,
        system: SYSTEM_PROMPT.to_string(),
        prompt,
    }
}

/// Parse and validate a raw oracle answer. A markdown fence around the JSON
/// is tolerated; anything else that is not a valid verdict is a schema error.
pub fn parse_verdict(raw: &str) -> Result<OracleVerdict, NeedScoopError> {
    let body = ai_client::strip_code_blocks(raw);
    if body.is_empty() {
        return Err(NeedScoopError::OracleSchema("empty response".into()));
    }
    let verdict: OracleVerdict = serde_json::from_str(body)
        .map_err(|e| NeedScoopError::OracleSchema(format!("invalid verdict JSON: {e}")))?;

    for (field, value) in [
        ("clarity", verdict.clarity),
        ("market", verdict.market),
        ("monetization", verdict.monetization),
        ("competition", verdict.competition),
        ("feasibility", verdict.feasibility),
    ] {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(NeedScoopError::OracleSchema(format!(
                "{field} must be within 0..=100 (got {value})"
            )));
        }
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use needscoop_common::ClusterId;

    fn post(id: &str, text: &str) -> Post {
        Post::builder()
            .id(id)
            .text(text)
            .created_at(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap())
            .likes(2)
            .build()
    }

    #[test]
    fn parses_fenced_verdict() {
        let raw = "```json\n{\"clarity\": 80, \"market\": 60, \"monetization\": 55.5, \"competition\": 30, \"feasibility\": 70, \"rationale\": \"clear pain\"}\n```";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.clarity, 80.0);
        assert_eq!(verdict.monetization, 55.5);
    }

    #[test]
    fn rejects_out_of_range_and_missing_fields() {
        let out_of_range = r#"{"clarity": 120, "market": 1, "monetization": 1, "competition": 1, "feasibility": 1, "rationale": "x"}"#;
        assert!(matches!(
            parse_verdict(out_of_range),
            Err(NeedScoopError::OracleSchema(_))
        ));
        let missing = r#"{"clarity": 50}"#;
        assert!(parse_verdict(missing).is_err());
        assert!(parse_verdict("I think this is a great idea!").is_err());
        assert!(parse_verdict("").is_err());
    }

    #[test]
    fn rejects_string_scores() {
        let raw = r#"{"clarity": "high", "market": 1, "monetization": 1, "competition": 1, "feasibility": 1, "rationale": "x"}"#;
        assert!(parse_verdict(raw).is_err());
    }

    #[test]
    fn samples_shortest_first_with_id_tiebreak() {
        let a = post("b", "medium length text");
        let b = post("a", "short one");
        let c = post("c", "short two");
        let d = post("d", "the longest text of them all");
        let samples = representative_samples(&[&a, &b, &c, &d], 3, 280);
        assert_eq!(samples, vec!["short one", "short two", "medium length text"]);
    }

    #[test]
    fn samples_truncate_on_char_boundary() {
        let p = post("a", "使いにくいアプリ");
        let samples = representative_samples(&[&p], 1, 3);
        assert_eq!(samples, vec!["使いに"]);
    }

    #[test]
    fn request_carries_summary_and_schema() {
        let posts = [post("a", "I wish there was a better app"), post("b", "why is there no app")];
        let members: Vec<&Post> = posts.iter().collect();
        let cluster = Cluster {
            id: ClusterId(4),
            members: vec!["a".into(), "b".into()],
            size: 2,
            centroid: vec![],
        };
        let categories = BTreeMap::from([("desire".to_string(), 2usize)]);
        let request = build_request(&cluster, &members, &categories, &OracleConfig::default());
        assert_eq!(request.cluster_id, ClusterId(4));
        assert!(request.prompt.contains("Cluster size: 2 posts"));
        assert!(request.prompt.contains("desire: 2"));
        assert!(request.prompt.contains("4 likes"));
        assert!(request.prompt.contains("\"rationale\""));
    }
}
