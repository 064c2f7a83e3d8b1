use std::time::Duration;

use rand::Rng;

use needscoop_common::EmbeddingConfig;

/// Exponential backoff: `base * 2^(attempt-1)`, capped, plus uniform jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_ms,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.base_backoff_ms, config.max_backoff_ms, config.jitter_ms)
    }

    /// Delay before retrying after failed attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms);
        Duration::from_millis(ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let b = Backoff::new(500, 30_000, 0);
        assert_eq!(b.base_delay(1), Duration::from_millis(500));
        assert_eq!(b.base_delay(2), Duration::from_millis(1_000));
        assert_eq!(b.base_delay(3), Duration::from_millis(2_000));
    }

    #[test]
    fn capped_at_max() {
        let b = Backoff::new(500, 3_000, 0);
        assert_eq!(b.base_delay(10), Duration::from_millis(3_000));
        assert_eq!(b.base_delay(u32::MAX), Duration::from_millis(3_000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let b = Backoff::new(100, 1_000, 50);
        for _ in 0..100 {
            let d = b.delay(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }
}
