//! Retry configuration and backoff math.
//!
//! Each client owns its retry loop (providers and the download engine have
//! different notions of what an attempt is), but they share the same
//! bounded-attempts, exponential-backoff-with-jitter schedule defined here.

use rand::Rng;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Maximum jitter as a fraction of the delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Config derived from a provider's `max_retries` setting.
    #[must_use]
    pub fn for_provider(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.max(1),
            ..Self::default()
        }
    }

    /// Per-URL download retries: two attempts, ~1.5s jittered backoff.
    #[must_use]
    pub const fn download() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

/// Backoff delay after `prior_failures` failed attempts, with jitter.
///
/// A server-supplied `retry_after` overrides the schedule (capped at the
/// configured maximum).
#[must_use]
pub fn backoff_delay(
    prior_failures: u32,
    config: &RetryConfig,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after.min(config.max_delay);
    }

    let base = config.initial_delay.as_secs_f64() * config.multiplier.powi(prior_failures as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_span = capped * config.jitter;
    let jitter = if jitter_span > 0.0 {
        rand::thread_rng().gen_range(-jitter_span..=jitter_span)
    } else {
        0.0
    };

    Duration::from_secs_f64((capped + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(config: RetryConfig) -> RetryConfig {
        RetryConfig {
            jitter: 0.0,
            ..config
        }
    }

    #[test]
    fn delay_grows_exponentially() {
        let config = no_jitter(RetryConfig {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            ..RetryConfig::default()
        });
        assert_eq!(backoff_delay(0, &config, None), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &config, None), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, &config, None), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let config = no_jitter(RetryConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            multiplier: 4.0,
            ..RetryConfig::default()
        });
        assert_eq!(backoff_delay(5, &config, None), Duration::from_secs(15));
    }

    #[test]
    fn retry_after_overrides_schedule() {
        let config = RetryConfig::default();
        assert_eq!(
            backoff_delay(0, &config, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        // But never beyond the configured ceiling.
        assert_eq!(
            backoff_delay(0, &config, Some(Duration::from_secs(600))),
            config.max_delay
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1000),
            multiplier: 1.0,
            jitter: 0.5,
            max_delay: Duration::from_secs(10),
            max_attempts: 3,
        };
        for _ in 0..100 {
            let delay = backoff_delay(0, &config, None);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn provider_config_bounds_attempts() {
        assert_eq!(RetryConfig::for_provider(0).max_attempts, 1);
        assert_eq!(RetryConfig::for_provider(5).max_attempts, 5);
        assert_eq!(RetryConfig::download().max_attempts, 2);
    }
}
