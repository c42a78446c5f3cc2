//! # Registry viewer
//!
//! Browse the repositories and tags of a container registry, either as a
//! static site written to disk or from an HTTP server which keeps a mirror
//! of the registry in memory.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use regview::{Filler, ServerBuilder};
//! use registry_client::{HttpRegistry, RegistryHost};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HttpRegistry::new(RegistryHost::new("registry.example.com"));
//! let app = ServerBuilder::new(Filler::new(Arc::new(registry), "registry.example.com", "/"))
//!     .ignored_user_agents(["kube-probe"])
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8093").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod filler;
pub mod generator;
#[cfg(feature = "cli")]
pub mod logging;
pub mod server;
pub mod templates;

pub use self::config::{Config, ConfigError};
pub use self::filler::Filler;
pub use self::generator::{GenerateError, Generator};
pub use self::server::{ServerBuilder, ServerError};
