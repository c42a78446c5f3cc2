//! # Registry mirror
//!
//! An in-memory, periodically refreshed copy of a container registry's
//! catalog, tag lists and image metadata.
//!
//! Three kinds of background task cooperate over two bounded queues:
//!
//! ```text
//! synchronizer --(repository queue)--> expander --(image queue)--> fetcher(s)
//!       \                                 \                          /
//!        `---------------------------> store <----------------------'
//! ```
//!
//! The synchronizer lists the catalog on a timer, retrying with backoff, and
//! queues every repository. The expander lists each repository's tags and
//! queues every tag. The fetchers resolve image info for each tag. Everything
//! lands in a store where each key is replaced whole, and [`Mirror`] serves
//! reads from that store through the [`Registry`] trait without touching the
//! network.
//!
//! A failure to list the catalog within the retry budget is fatal and stops
//! the mirror. Failures for single repositories or tags are logged and
//! dropped; the next cycle tries again. Data that was fetched successfully is
//! never evicted, so a stopped mirror keeps serving its last snapshot.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirror::{Mirror, MirrorConfig};
//! use registry_client::{HttpRegistry, Registry, RegistryHost};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream = HttpRegistry::new(RegistryHost::new("registry.example.com"));
//! let mirror = Mirror::new(Arc::new(upstream), MirrorConfig::default());
//!
//! let cancel = CancellationToken::new();
//! let background = tokio::spawn({
//!     let mirror = mirror.clone();
//!     let cancel = cancel.clone();
//!     async move { mirror.start(cancel).await }
//! });
//!
//! // Reads never block on the registry; early on they may come back empty.
//! let repositories = mirror.list_repositories().await?;
//!
//! cancel.cancel();
//! background.await??;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use registry_client::{ImageInfo, Registry, RegistryError, RegistryResult};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

mod backoff;
mod config;
mod error;
mod expander;
mod fetcher;
mod store;
mod synchronizer;

pub use self::backoff::BackoffConfig;
pub use self::config::MirrorConfig;
pub use self::error::MirrorError;
pub use self::store::MirrorStatus;

use self::expander::Expander;
use self::fetcher::Fetcher;
use self::store::Store;
use self::synchronizer::Synchronizer;

/// A cached [`Registry`], refreshed in the background by [`Mirror::start`].
///
/// Clones share the same store.
#[derive(Debug, Clone)]
pub struct Mirror {
    registry: Arc<dyn Registry>,
    config: MirrorConfig,
    store: Arc<Store>,
}

impl Mirror {
    /// An empty mirror of `registry`. Nothing is fetched until [`Mirror::start`].
    pub fn new(registry: Arc<dyn Registry>, config: MirrorConfig) -> Self {
        Self {
            registry,
            config,
            store: Arc::new(Store::default()),
        }
    }

    /// What the mirror holds right now.
    pub fn status(&self) -> MirrorStatus {
        self.store.status()
    }

    /// Run the mirror until `cancel` fires or the catalog can't be listed.
    ///
    /// Returns `Ok(())` after cancellation, once every task has stopped.
    /// In-flight registry calls are allowed to finish, but nothing new is
    /// started after cancellation. On a fatal error every task is stopped
    /// and the error is returned; the store keeps its contents, and the
    /// mirror may be started again.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), MirrorError> {
        let cancel = cancel.child_token();
        let (repository_tx, repository_rx) = mpsc::channel(self.config.repository_queue);
        let (image_tx, image_rx) = mpsc::channel(self.config.image_queue);
        let image_rx = Arc::new(Mutex::new(image_rx));

        tracing::info!(
            workers = self.config.image_workers,
            refresh = ?self.config.refresh_interval,
            "starting mirror"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(
            Synchronizer {
                registry: self.registry.clone(),
                store: self.store.clone(),
                backoff: self.config.backoff,
                refresh_interval: self.config.refresh_interval,
                repositories: repository_tx,
            }
            .run(cancel.clone()),
        );

        tasks.spawn(
            Expander {
                registry: self.registry.clone(),
                store: self.store.clone(),
                repositories: repository_rx,
                images: image_tx,
            }
            .run(cancel.clone()),
        );

        for id in 0..self.config.image_workers {
            tasks.spawn(
                Fetcher {
                    id,
                    registry: self.registry.clone(),
                    store: self.store.clone(),
                    tasks: image_rx.clone(),
                }
                .run(cancel.clone()),
            );
        }

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(MirrorError::from).and_then(|result| result);
            if let Err(error) = result {
                cancel.cancel();
                if outcome.is_ok() {
                    outcome = Err(error);
                }
            }
        }

        match &outcome {
            Ok(()) => tracing::info!("mirror stopped"),
            Err(error) => tracing::error!(%error, "mirror failed"),
        }
        outcome
    }
}

/// Send `item`, waiting for space or cancellation. Returns `false` if the
/// item was not sent.
pub(crate) async fn enqueue<T>(
    queue: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = queue.send(item) => sent.is_ok(),
    }
}

#[async_trait::async_trait]
impl Registry for Mirror {
    async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        Ok(self.store.catalog())
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        self.store
            .tags(repository)
            .ok_or_else(|| RegistryError::repository_not_found(repository))
    }

    async fn image_info(&self, repository: &str, tag: &str) -> RegistryResult<ImageInfo> {
        self.store
            .image(repository, tag)
            .ok_or_else(|| RegistryError::tag_not_found(repository, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn enqueue_respects_cancellation() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        assert!(enqueue(&tx, 1, &cancel).await);

        // The queue is full; only cancellation can end this send.
        let blocked = tokio::spawn({
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move { enqueue(&tx, 2, &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(!blocked.await.unwrap());
        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_into_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!enqueue(&tx, "alpha", &CancellationToken::new()).await);
    }
}
