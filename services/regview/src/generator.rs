//! Render the whole registry as a static site.

use camino::{Utf8Path, Utf8PathBuf};
use registry_client::RegistryError;

use crate::filler::Filler;
use crate::templates;

/// Errors which stop generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The repository list could not be read.
    #[error("listing repositories: {0}")]
    Registry(#[from] RegistryError),

    /// A file or directory could not be written.
    #[error("writing {path}: {source}")]
    Io {
        /// Path being written
        path: Utf8PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },
}

/// What was written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Repository pages written.
    pub written: usize,

    /// Repositories without a page.
    pub skipped: usize,
}

/// Writes a site into an output directory.
#[derive(Debug, Clone)]
pub struct Generator {
    filler: Filler,
    output: Utf8PathBuf,
}

impl Generator {
    /// A generator filling pages with `filler` and writing under `output`.
    pub fn new(filler: Filler, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            filler,
            output: output.into(),
        }
    }

    /// Write `static/style.css`, a page per repository under `repo/`, and `index.html`.
    ///
    /// Repositories that fail or have no data are logged and left out of the
    /// site. Failing to list repositories, or to write any file, stops generation.
    #[tracing::instrument(skip(self), fields(output = %self.output))]
    pub async fn generate(&self) -> Result<Summary, GenerateError> {
        write(&self.output.join("static").join("style.css"), templates::STYLE).await?;

        let mut summary = Summary::default();
        let mut pages = Vec::new();
        for repository in self.filler.registry().list_repositories().await? {
            match self.filler.repository_data(&repository).await {
                Ok(Some(data)) => {
                    let path = self.output.join("repo").join(&repository).join("index.html");
                    write(&path, &templates::repository(&data)).await?;
                    tracing::debug!(%repository, %path, "wrote repository page");
                    summary.written += 1;
                    pages.push(data);
                }
                Ok(None) => {
                    tracing::warn!(%repository, "no tags with image data, skipping");
                    summary.skipped += 1;
                }
                Err(error) => {
                    tracing::warn!(%repository, %error, "skipping repository");
                    summary.skipped += 1;
                }
            }
        }

        let index = self.filler.index_from(pages);
        write(&self.output.join("index.html"), &templates::index(&index)).await?;

        tracing::info!(
            written = summary.written,
            skipped = summary.skipped,
            "generated site"
        );
        Ok(summary)
    }
}

async fn write(path: &Utf8Path, contents: &str) -> Result<(), GenerateError> {
    let io = |source| GenerateError::Io {
        path: path.to_owned(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io)?;
    }
    tokio::fs::write(path, contents).await.map_err(io)
}
