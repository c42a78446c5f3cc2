//! The HTTP server: registry pages rendered on demand from a [`Mirror`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use echocache::{EchoCache, EchoError};
use mirror::Mirror;
use registry_client::Registry;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServeConfig;
use crate::filler::Filler;
use crate::templates;

mod error;

pub use self::error::{ErrorPage, ServerError};

/// Builder for the page router.
#[derive(Debug)]
pub struct ServerBuilder {
    filler: Filler,
    cache_lifetime: Option<Duration>,
    ignored_user_agents: Vec<String>,
}

impl ServerBuilder {
    /// Pages will be filled by `filler`.
    pub fn new(filler: Filler) -> Self {
        Self {
            filler,
            cache_lifetime: Some(Duration::from_secs(10 * 60)),
            ignored_user_agents: Vec::new(),
        }
    }

    /// How long rendered pages are kept. `None` keeps them forever.
    pub fn cache_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.cache_lifetime = lifetime;
        self
    }

    /// Requests with a `User-Agent` containing any of these get an empty `200 OK`.
    pub fn ignored_user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_user_agents = agents
            .into_iter()
            .map(Into::into)
            .filter(|agent: &String| !agent.is_empty())
            .collect();
        self
    }

    /// Build the router.
    pub fn build(self) -> Router {
        let state = AppState {
            filler: self.filler,
            pages: EchoCache::new(self.cache_lifetime),
        };
        let ignored: Arc<[String]> = self.ignored_user_agents.into();

        Router::new()
            .route("/", get(index))
            .route("/repo/{*slug}", get(repository))
            .fallback(not_found)
            .layer(SetResponseHeaderLayer::overriding(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            ))
            .layer(middleware::from_fn_with_state(ignored, ignore_user_agents))
            .route("/static/style.css", get(style))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Mirror `upstream` in the background and serve its pages until `cancel` fires.
///
/// If the mirror fails, the server keeps answering from the last snapshot.
pub async fn run(
    upstream: Arc<dyn Registry>,
    registry_name: &str,
    config: &ServeConfig,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mirror = Mirror::new(upstream, config.mirror());
    let background = tokio::spawn({
        let mirror = mirror.clone();
        let cancel = cancel.clone();
        async move {
            if mirror.start(cancel).await.is_err() {
                tracing::warn!("no more refreshes, serving the last registry snapshot");
            }
        }
    });

    let app = ServerBuilder::new(Filler::from_mirror(mirror, registry_name, "/"))
        .cache_lifetime(config.cache_lifetime())
        .ignored_user_agents(config.ignored_user_agents.iter().cloned())
        .build();

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    cancel.cancel();
    if let Err(error) = background.await {
        tracing::error!(%error, "mirror task panicked");
    }
    tracing::info!("server stopped");
    served
}

#[derive(Debug, Clone)]
struct AppState {
    filler: Filler,
    pages: EchoCache<String, String, ServerError>,
}

impl AppState {
    /// Serve the page for `uri` from the cache, rendering it on a miss. Pages
    /// are keyed on the path alone; the query never changes what is rendered.
    async fn cached<F, Fut>(&self, uri: &Uri, render: F) -> Result<Html<String>, ErrorPage>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<String, ServerError>> + Send + 'static,
    {
        match self.pages.get_or_try_insert_with(uri.path().to_owned(), render).await {
            Ok(page) => Ok(Html(page)),
            Err(EchoError::Failed(error)) => Err(error.page(self.filler.base_data())),
            Err(EchoError::Abandoned) => Err(ServerError::Abandoned.page(self.filler.base_data())),
        }
    }
}

async fn index(State(state): State<AppState>, uri: Uri) -> Result<Html<String>, ErrorPage> {
    let filler = state.filler.clone();
    state.cached(&uri, move || render_index(filler)).await
}

async fn render_index(filler: Filler) -> Result<String, ServerError> {
    let data = filler.index_data().await?;
    Ok(templates::index(&data))
}

async fn repository(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    uri: Uri,
) -> Result<Html<String>, ErrorPage> {
    let name = slug.trim_matches('/').to_owned();
    if name.is_empty() {
        return Err(ServerError::NotFound.page(state.filler.base_data()));
    }

    let filler = state.filler.clone();
    state
        .cached(&uri, move || render_repository(filler, name))
        .await
}

async fn render_repository(filler: Filler, name: String) -> Result<String, ServerError> {
    match filler.repository_data(&name).await? {
        Some(data) => Ok(templates::repository(&data)),
        None => Err(ServerError::NotFound),
    }
}

async fn style() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], templates::STYLE)
}

async fn not_found(State(state): State<AppState>) -> ErrorPage {
    ServerError::NotFound.page(state.filler.base_data())
}

async fn ignore_user_agents(
    State(ignored): State<Arc<[String]>>,
    request: Request,
    next: Next,
) -> Response {
    let agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if ignored.iter().any(|needle| agent.contains(needle.as_str())) {
        tracing::debug!(user_agent = agent, "ignoring request");
        return StatusCode::OK.into_response();
    }

    next.run(request).await
}
