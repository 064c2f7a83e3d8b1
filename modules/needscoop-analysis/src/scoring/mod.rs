//! Priority scoring: three quantitative sub-scores from the cluster itself,
//! two qualitative ones from the judgment oracle.

pub mod oracle;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use needscoop_common::{
    Cluster, GrowthMetrics, JudgmentOracle, OracleConfig, OracleJudgment, Post, ScoreRecord,
    ScoringConfig, ScoringWeights,
};

pub use oracle::{build_request, parse_verdict, representative_samples, OracleVerdict};

/// Clarity and monetization when the oracle never answered validly.
pub const NEUTRAL_FALLBACK: f64 = 50.0;

pub fn volume_score(size: usize, saturation: f64) -> f64 {
    log_scaled(size as f64, saturation)
}

pub fn engagement_score(total: u64, saturation: f64) -> f64 {
    log_scaled(total as f64, saturation)
}

fn log_scaled(value: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 {
        return 0.0;
    }
    (100.0 * (1.0 + value).ln() / (1.0 + saturation).ln()).clamp(0.0, 100.0)
}

/// Member counts in the recent window `(as_of - w, as_of]` and the prior
/// window `(as_of - 2w, as_of - w]`.
pub fn growth_metrics<I>(created: I, as_of: DateTime<Utc>, window_days: i64) -> GrowthMetrics
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let window = ChronoDuration::days(window_days.max(1));
    let recent_start = as_of - window;
    let prior_start = recent_start - window;

    let (mut recent, mut prior) = (0, 0);
    for t in created {
        if t > recent_start && t <= as_of {
            recent += 1;
        } else if t > prior_start && t <= recent_start {
            prior += 1;
        }
    }
    GrowthMetrics {
        recent,
        prior,
        ratio: (prior > 0).then(|| recent as f64 / prior as f64),
    }
}

pub fn growth_score(metrics: &GrowthMetrics) -> f64 {
    match metrics.ratio {
        Some(r) => (100.0 * r / (1.0 + r)).clamp(0.0, 100.0),
        None if metrics.recent > 0 => 100.0,
        None => 0.0,
    }
}

/// Weighted sum of the five sub-scores, clamped to [0, 100].
pub fn composite_score(
    weights: &ScoringWeights,
    volume: f64,
    engagement: f64,
    growth: f64,
    clarity: f64,
    monetization: f64,
) -> f64 {
    let total = weights.volume * volume
        + weights.engagement * engagement
        + weights.growth * growth
        + weights.clarity * clarity
        + weights.monetization * monetization;
    if total.is_finite() {
        total.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCluster {
    pub record: ScoreRecord,
    pub growth: GrowthMetrics,
    pub oracle_attempts: u32,
}

pub struct ScoringEngine<'a> {
    oracle: &'a dyn JudgmentOracle,
    scoring: &'a ScoringConfig,
    oracle_config: &'a OracleConfig,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(
        oracle: &'a dyn JudgmentOracle,
        scoring: &'a ScoringConfig,
        oracle_config: &'a OracleConfig,
    ) -> Self {
        Self {
            oracle,
            scoring,
            oracle_config,
        }
    }

    /// Score one cluster. Oracle failures degrade to the neutral fallback;
    /// this never fails.
    pub async fn score(
        &self,
        cluster: &Cluster,
        members: &[&Post],
        categories: &BTreeMap<String, usize>,
        as_of: DateTime<Utc>,
    ) -> ScoredCluster {
        let volume = volume_score(cluster.size, self.scoring.volume_saturation);
        let engagement_total: u64 = members.iter().map(|p| p.engagement()).sum();
        let engagement = engagement_score(engagement_total, self.scoring.engagement_saturation);
        let growth_metrics = growth_metrics(
            members.iter().map(|p| p.created_at),
            as_of,
            self.scoring.growth_window_days,
        );
        let growth = growth_score(&growth_metrics);

        let (verdict, oracle_attempts) = self.judge(cluster, members, categories).await;
        let (clarity, monetization, judgment) = match verdict {
            Some(v) => (
                v.clarity,
                v.monetization,
                Some(OracleJudgment {
                    market: v.market,
                    competition: v.competition,
                    feasibility: v.feasibility,
                    rationale: v.rationale,
                }),
            ),
            None => (NEUTRAL_FALLBACK, NEUTRAL_FALLBACK, None),
        };

        let composite = composite_score(
            &self.scoring.weights,
            volume,
            engagement,
            growth,
            clarity,
            monetization,
        );
        debug!(
            cluster_id = %cluster.id,
            volume, engagement, growth, clarity, monetization, composite,
            "Cluster scored"
        );

        ScoredCluster {
            record: ScoreRecord {
                cluster_id: cluster.id,
                volume,
                engagement,
                growth,
                clarity,
                monetization,
                composite,
                unscored_by_oracle: judgment.is_none(),
                oracle: judgment,
            },
            growth: growth_metrics,
            oracle_attempts,
        }
    }

    async fn judge(
        &self,
        cluster: &Cluster,
        members: &[&Post],
        categories: &BTreeMap<String, usize>,
    ) -> (Option<OracleVerdict>, u32) {
        let request = build_request(cluster, members, categories, self.oracle_config);
        let max_attempts = self.oracle_config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let outcome = match self.oracle.judge(&request).await {
                Ok(raw) => parse_verdict(&raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(verdict) => return (Some(verdict), attempt),
                Err(error) => {
                    warn!(
                        cluster_id = %cluster.id,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Oracle judgment failed"
                    );
                    if attempt < max_attempts && self.oracle_config.retry_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.oracle_config.retry_delay_ms))
                            .await;
                    }
                }
            }
        }

        warn!(
            cluster_id = %cluster.id,
            "Oracle unavailable, using neutral clarity and monetization"
        );
        (None, max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_log_scaled_and_capped() {
        let expected = 100.0 * 13f64.ln() / 1001f64.ln();
        assert!((volume_score(12, 1000.0) - expected).abs() < 1e-9);
        assert_eq!(volume_score(0, 1000.0), 0.0);
        assert_eq!(volume_score(5000, 1000.0), 100.0);
    }

    #[test]
    fn engagement_is_log_scaled() {
        assert_eq!(engagement_score(0, 10_000.0), 0.0);
        assert_eq!(engagement_score(10_000, 10_000.0), 100.0);
        assert!(engagement_score(100, 10_000.0) > engagement_score(10, 10_000.0));
    }

    #[test]
    fn growth_windows_are_half_open() {
        let as_of = Utc::now();
        let day = ChronoDuration::days(1);
        let created = vec![
            as_of,                // recent (inclusive end)
            as_of - day * 3,      // recent
            as_of - day * 7,      // prior (boundary belongs to prior)
            as_of - day * 10,     // prior
            as_of - day * 14,     // outside
            as_of + day,          // future, ignored
        ];
        let m = growth_metrics(created, as_of, 7);
        assert_eq!(m.recent, 2);
        assert_eq!(m.prior, 2);
        assert_eq!(m.ratio, Some(1.0));
        assert!((growth_score(&m) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn growth_edge_cases() {
        let only_recent = GrowthMetrics {
            recent: 3,
            prior: 0,
            ratio: None,
        };
        assert_eq!(growth_score(&only_recent), 100.0);
        let nothing = GrowthMetrics {
            recent: 0,
            prior: 0,
            ratio: None,
        };
        assert_eq!(growth_score(&nothing), 0.0);
        let shrinking = GrowthMetrics {
            recent: 0,
            prior: 4,
            ratio: Some(0.0),
        };
        assert_eq!(growth_score(&shrinking), 0.0);
    }

    #[test]
    fn composite_stays_in_range() {
        let w = ScoringWeights::default();
        assert_eq!(composite_score(&w, 100.0, 100.0, 100.0, 100.0, 100.0), 100.0);
        assert_eq!(composite_score(&w, 0.0, 0.0, 0.0, 0.0, 0.0), 0.0);
        let mid = composite_score(&w, 50.0, 50.0, 50.0, 50.0, 50.0);
        assert!((mid - 50.0).abs() < 1e-9);
        assert_eq!(composite_score(&w, f64::NAN, 0.0, 0.0, 0.0, 0.0), 0.0);
    }
}
