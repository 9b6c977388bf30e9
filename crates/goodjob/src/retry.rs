//! Retry/backoff policy (spec §4.5 "Backoff" and "Discard classification").
//! The executor only ever calls [`BackoffPolicy::delay_seconds`]; how that
//! number is produced is the handler's choice.

use rand::Rng;

/// How long to wait before a job's next attempt, as a function of the
/// 1-indexed attempt number that just failed.
pub trait BackoffPolicy: Send + Sync {
    fn delay_seconds(&self, attempt_no: i32) -> i64;
}

/// Spec default: a flat 3 second delay regardless of attempt number.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff {
    pub seconds: i64,
}

impl Default for ConstantBackoff {
    fn default() -> Self {
        Self { seconds: 3 }
    }
}

impl BackoffPolicy for ConstantBackoff {
    fn delay_seconds(&self, _attempt_no: i32) -> i64 {
        self.seconds
    }
}

/// `base^attempt` capped at `max_seconds`, with up to `jitter_pct` of the
/// capped delay added or subtracted.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: f64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: 2.0,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay_seconds(&self, attempt_no: i32) -> i64 {
        let attempt_no = attempt_no.max(1) as i32;
        let raw = self.base.powi(attempt_no);
        let capped = raw.min(self.max_seconds as f64);

        let mut rng = rand::thread_rng();
        let jitter_range = capped * self.jitter_pct;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        ((capped + jitter).round() as i64).clamp(0, self.max_seconds)
    }
}

/// Declares which error reasons a handler wants mapped straight to
/// `discard` regardless of attempts remaining (spec "Discard
/// classification"). Matching is substring-based against the error's
/// reason text, which keeps it cheap to declare without a full pattern
/// language.
#[derive(Debug, Clone, Default)]
pub struct DiscardOn {
    patterns: Vec<String>,
}

impl DiscardOn {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, reason: &str) -> bool {
        self.patterns.iter().any(|p| reason.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_is_flat() {
        let b = ConstantBackoff::default();
        assert_eq!(b.delay_seconds(1), 3);
        assert_eq!(b.delay_seconds(10), 3);
    }

    #[test]
    fn exponential_backoff_caps_out() {
        let b = ExponentialBackoff {
            base: 2.0,
            max_seconds: 100,
            jitter_pct: 0.0,
        };
        assert_eq!(b.delay_seconds(3), 8);
        assert_eq!(b.delay_seconds(20), 100);
    }

    #[test]
    fn discard_on_matches_substring() {
        let discard = DiscardOn::new(["ValidationError", "NotFound"]);
        assert!(discard.matches("raised a ValidationError: bad input"));
        assert!(!discard.matches("connection reset"));
    }
}
