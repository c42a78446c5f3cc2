use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Construction-time settings for a [`Mirror`](crate::Mirror).
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    pub(crate) refresh_interval: Duration,
    pub(crate) backoff: BackoffConfig,
    pub(crate) repository_queue: usize,
    pub(crate) image_queue: usize,
    pub(crate) image_workers: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5 * 60),
            backoff: BackoffConfig::default(),
            repository_queue: 10,
            image_queue: 10,
            image_workers: 1,
        }
    }
}

impl MirrorConfig {
    /// Wait this long after a successful cycle before starting the next.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Retry policy for listing the catalog.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Capacity of the queue feeding the repository expander.
    pub fn repository_queue(mut self, capacity: usize) -> Self {
        self.repository_queue = capacity.max(1);
        self
    }

    /// Capacity of the queue feeding the image info fetchers.
    pub fn image_queue(mut self, capacity: usize) -> Self {
        self.image_queue = capacity.max(1);
        self
    }

    /// Number of concurrent image info fetchers.
    pub fn image_workers(mut self, workers: usize) -> Self {
        self.image_workers = workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_are_clamped() {
        let config = MirrorConfig::default()
            .repository_queue(0)
            .image_queue(0)
            .image_workers(0);

        assert_eq!(config.repository_queue, 1);
        assert_eq!(config.image_queue, 1);
        assert_eq!(config.image_workers, 1);
    }
}
