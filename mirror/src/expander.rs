//! Turns one repository into a tag list plus per-tag work.

use std::sync::Arc;

use registry_client::Registry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::enqueue;
use crate::error::MirrorError;
use crate::fetcher::ImageTask;
use crate::store::Store;

#[derive(Debug)]
pub(crate) struct Expander {
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) store: Arc<Store>,
    pub(crate) repositories: mpsc::Receiver<String>,
    pub(crate) images: mpsc::Sender<ImageTask>,
}

impl Expander {
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<(), MirrorError> {
        loop {
            let repository = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                repository = self.repositories.recv() => match repository {
                    Some(repository) => repository,
                    None => break,
                },
            };

            if !self.expand(repository, &cancel).await {
                break;
            }
        }

        tracing::debug!("expander stopped");
        Ok(())
    }

    /// Returns `false` once cancelled.
    #[tracing::instrument(skip(self, cancel))]
    async fn expand(&self, repository: String, cancel: &CancellationToken) -> bool {
        tracing::debug!("listing tags");
        let tags = match self.registry.list_tags(&repository).await {
            Ok(tags) => tags,
            Err(error) if error.is_not_found() => {
                tracing::info!(%error, "repository disappeared");
                return true;
            }
            Err(error) => {
                tracing::warn!(%error, "listing tags failed");
                return true;
            }
        };

        self.store.set_tags(&repository, &tags);

        for tag in tags {
            let task = ImageTask {
                repository: repository.clone(),
                tag,
            };
            if !enqueue(&self.images, task, cancel).await {
                return false;
            }
        }
        true
    }
}
