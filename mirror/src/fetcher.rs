//! Resolves image info for single tags.

use std::sync::Arc;

use registry_client::Registry;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::MirrorError;
use crate::store::Store;

/// One `(repository, tag)` pair to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageTask {
    pub(crate) repository: String,
    pub(crate) tag: String,
}

/// One of possibly several workers draining the shared image queue.
#[derive(Debug)]
pub(crate) struct Fetcher {
    pub(crate) id: usize,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) store: Arc<Store>,
    pub(crate) tasks: Arc<Mutex<mpsc::Receiver<ImageTask>>>,
}

impl Fetcher {
    pub(crate) async fn run(self, cancel: CancellationToken) -> Result<(), MirrorError> {
        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                task = async { self.tasks.lock().await.recv().await } => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            self.fetch(task).await;
        }

        tracing::debug!(worker = self.id, "fetcher stopped");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(worker = self.id, repository = %task.repository, tag = %task.tag))]
    async fn fetch(&self, task: ImageTask) {
        tracing::debug!("fetching image info");
        match self.registry.image_info(&task.repository, &task.tag).await {
            Ok(info) => self.store.set_image(&task.repository, &task.tag, info),
            Err(error) if error.is_not_found() => {
                tracing::info!(%error, "tag disappeared");
            }
            Err(error) => {
                tracing::warn!(%error, "fetching image info failed");
            }
        }
    }
}
