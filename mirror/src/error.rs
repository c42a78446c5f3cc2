use std::time::Duration;

use registry_client::RegistryError;

/// A failure that stops the mirror.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The catalog could not be listed within the retry budget.
    #[error("listing the catalog failed {attempts} times over {elapsed:?}: {source}")]
    Synchronize {
        /// Number of listing attempts made in the failed cycle
        attempts: u32,
        /// Time spent in the failed cycle
        elapsed: Duration,
        /// The last listing error
        #[source]
        source: RegistryError,
    },

    /// A mirror task panicked.
    #[error("mirror task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
