//! Periodic catalog refresh, seeding repository expansion.

use std::sync::Arc;
use std::time::Duration;

use registry_client::Registry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig};
use crate::enqueue;
use crate::error::MirrorError;
use crate::store::Store;

#[derive(Debug)]
pub(crate) struct Synchronizer {
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) store: Arc<Store>,
    pub(crate) backoff: BackoffConfig,
    pub(crate) refresh_interval: Duration,
    pub(crate) repositories: mpsc::Sender<String>,
}

impl Synchronizer {
    /// Run cycles until cancelled, or until one cycle exhausts its retry budget.
    pub(crate) async fn run(self, cancel: CancellationToken) -> Result<(), MirrorError> {
        loop {
            tracing::info!("synchronizing catalog");
            let Some(repositories) = self.list_repositories(&cancel).await? else {
                break;
            };

            tracing::info!(repositories = repositories.len(), "catalog synchronized");
            self.store.set_catalog(repositories.clone());

            for repository in repositories {
                tracing::debug!(%repository, "queueing repository");
                if !enqueue(&self.repositories, repository, &cancel).await {
                    return Ok(());
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }
        }

        tracing::debug!("synchronizer stopped");
        Ok(())
    }

    /// List the catalog with backoff. `Ok(None)` means cancelled.
    async fn list_repositories(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<String>>, MirrorError> {
        let mut backoff = Backoff::new(self.backoff);
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            attempts += 1;
            let error = match self.registry.list_repositories().await {
                Ok(repositories) => return Ok(Some(repositories)),
                Err(error) => error,
            };

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(%error, attempts, "giving up on listing the catalog");
                return Err(MirrorError::Synchronize {
                    attempts,
                    elapsed: backoff.elapsed(),
                    source: error,
                });
            };

            tracing::warn!(%error, attempts, ?delay, "listing the catalog failed, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
