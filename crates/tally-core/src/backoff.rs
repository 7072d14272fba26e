//! Reconnect backoff configuration and delay calculation.
//!
//! `delay(n) = min(initial * factor^n, max) + jitter`, jitter uniform in
//! `[0, jitter_ms)`. `n` is the number of reconnect attempts already made,
//! so the first retry waits roughly `initial`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the first reconnect, in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default upper bound on the exponential part, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default growth factor.
pub const DEFAULT_FACTOR: f64 = 2.0;
/// Default jitter window, in milliseconds.
pub const DEFAULT_JITTER_MS: u64 = 1000;

/// Reconnect policy for the realtime client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            factor: DEFAULT_FACTOR,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay calculation
// ─────────────────────────────────────────────────────────────────────────────

impl BackoffConfig {
    /// Exponential part of the delay for `attempt`, capped at `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = (self.initial_delay_ms as f64) * self.factor.max(1.0).powi(exp);
        if !raw.is_finite() || raw >= self.max_delay_ms as f64 {
            return self.max_delay_ms;
        }
        raw.floor() as u64
    }

    /// Full delay with caller-supplied randomness in `[0.0, 1.0)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_ms_with_random(&self, attempt: u32, random: f64) -> u64 {
        let random = random.clamp(0.0, 1.0);
        let jitter = ((self.jitter_ms as f64) * random).floor() as u64;
        // random == 1.0 must still stay below the window
        let jitter = jitter.min(self.jitter_ms.saturating_sub(1));
        self.base_delay_ms(attempt).saturating_add(jitter)
    }

    /// Full delay using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        let random: f64 = rand::thread_rng().gen();
        Duration::from_millis(self.delay_ms_with_random(attempt, random))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BackoffConfig {
        BackoffConfig::default()
    }

    #[test]
    fn defaults() {
        let c = cfg();
        assert_eq!(c.max_attempts, 5);
        assert_eq!(c.initial_delay_ms, 1000);
        assert_eq!(c.max_delay_ms, 30_000);
        assert!((c.factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(c.jitter_ms, 1000);
    }

    #[test]
    fn base_delay_grows_exponentially() {
        let c = cfg();
        assert_eq!(c.base_delay_ms(0), 1000);
        assert_eq!(c.base_delay_ms(1), 2000);
        assert_eq!(c.base_delay_ms(2), 4000);
        assert_eq!(c.base_delay_ms(4), 16_000);
    }

    #[test]
    fn base_delay_is_capped() {
        let c = cfg();
        assert_eq!(c.base_delay_ms(5), 30_000);
        assert_eq!(c.base_delay_ms(40), 30_000);
        assert_eq!(c.base_delay_ms(u32::MAX), 30_000);
    }

    #[test]
    fn jitter_bounds() {
        let c = cfg();
        assert_eq!(c.delay_ms_with_random(0, 0.0), 1000);
        assert_eq!(c.delay_ms_with_random(0, 0.5), 1500);
        assert_eq!(c.delay_ms_with_random(0, 0.999_999), 1999);
        assert_eq!(c.delay_ms_with_random(0, 1.0), 1999);
    }

    #[test]
    fn random_delay_stays_in_window() {
        let c = cfg();
        for attempt in 0..10 {
            let floor = c.base_delay_ms(attempt);
            for _ in 0..100 {
                let d = u64::try_from(c.delay(attempt).as_millis()).unwrap();
                assert!(d >= floor, "attempt {attempt}: {d} < {floor}");
                assert!(d < floor + 1000, "attempt {attempt}: {d} >= {floor}+1000");
                assert!(d < c.max_delay_ms + 1000);
            }
        }
    }

    #[test]
    fn zero_jitter_window() {
        let c = BackoffConfig {
            jitter_ms: 0,
            ..cfg()
        };
        assert_eq!(c.delay_ms_with_random(1, 0.7), 2000);
    }

    #[test]
    fn fractional_factor() {
        let c = BackoffConfig {
            factor: 1.5,
            ..cfg()
        };
        assert_eq!(c.base_delay_ms(2), 2250);
    }

    #[test]
    fn deserializes_partial_json() {
        let c: BackoffConfig = serde_json::from_str(r#"{"maxAttempts": 2}"#).unwrap();
        assert_eq!(c.max_attempts, 2);
        assert_eq!(c.initial_delay_ms, 1000);
    }
}
