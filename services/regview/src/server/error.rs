//! Error pages

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use registry_client::RegistryError;

use crate::filler::BaseData;
use crate::templates;

/// Why a page could not be rendered.
///
/// Cheap to clone, so one failed render can be handed to every request
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    /// Nothing lives at this path
    #[error("page not found")]
    NotFound,

    /// The path names something that can't be a repository
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// The registry could not be read
    #[error("registry error: {0}")]
    Registry(#[source] Arc<RegistryError>),

    /// The render was dropped before it finished
    #[error("page render was abandoned")]
    Abandoned,
}

impl From<RegistryError> for ServerError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::InvalidReference(name) => ServerError::InvalidRepository(name),
            error if error.is_not_found() => ServerError::NotFound,
            error => ServerError::Registry(Arc::new(error)),
        }
    }
}

impl ServerError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::NotFound | ServerError::InvalidRepository(_) => StatusCode::NOT_FOUND,
            ServerError::Registry(_) | ServerError::Abandoned => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach what the error page needs to render.
    pub fn page(self, base: BaseData) -> ErrorPage {
        ErrorPage { error: self, base }
    }
}

/// A [`ServerError`] ready to be rendered as HTML.
#[derive(Debug)]
pub struct ErrorPage {
    error: ServerError,
    base: BaseData,
}

impl ErrorPage {
    /// The underlying error.
    pub fn error(&self) -> &ServerError {
        &self.error
    }
}

impl IntoResponse for ErrorPage {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = if status == StatusCode::NOT_FOUND {
            tracing::debug!(error = %self.error, "not found");
            templates::not_found(&self.base)
        } else {
            tracing::error!(error = %self.error, "failed to render page");
            templates::internal_error(&self.base)
        };

        (status, Html(body)).into_response()
    }
}
