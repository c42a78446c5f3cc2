use std::time::Duration;

use tokio::time::Instant;

/// Retry parameters for one catalog synchronization cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_interval: Duration,

    /// Factor applied to the delay after each further failure.
    pub multiplier: f64,

    /// Upper bound on a single delay.
    pub max_interval: Duration,

    /// Give up once this much time would have passed in the cycle.
    pub max_elapsed: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.1,
            max_interval: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

/// Exponential backoff with an elapsed-time budget.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    delay: Duration,
    started: Instant,
}

impl Backoff {
    /// Start a fresh budget now.
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self {
            delay: config.initial_interval.min(config.max_interval),
            config,
            started: Instant::now(),
        }
    }

    /// Time since the budget started.
    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The delay before the next attempt, or `None` once waiting it out would
    /// overrun the elapsed-time budget.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delay;
        if self.elapsed().saturating_add(delay) > self.config.max_elapsed {
            return None;
        }

        let max = self.config.max_interval;
        let grown = delay.as_secs_f64() * self.config.multiplier.max(1.0);
        self.delay = Duration::try_from_secs_f64(grown).unwrap_or(max).min(max);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delays_grow_and_cap() {
        let mut backoff = Backoff::new(config());
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().unwrap()).collect();

        assert_eq!(delays, [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_exhausted() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_elapsed: Duration::from_secs(10),
            ..config()
        });

        let mut waited = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            waited += delay;
        }

        // 1 + 2 + 4 fits; the capped 5 would end at 12s.
        assert_eq!(waited, Duration::from_secs(7));
        assert_eq!(backoff.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_interval_is_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_interval: Duration::from_secs(30),
            ..config()
        });
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_growth_is_capped() {
        for multiplier in [f64::INFINITY, 1e30] {
            let mut backoff = Backoff::new(BackoffConfig {
                multiplier,
                ..config()
            });
            assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
            assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
            assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
        }
    }
}
