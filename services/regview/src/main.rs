//! Browse a container registry as a static site or from a live server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use eyre::WrapErr as _;
use registry_client::HttpRegistry;
use regview::config::{Config, parse_duration};
use regview::{Filler, Generator};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "regview", version, about = "Browse the repositories and tags of a container registry")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "REGVIEW_CONFIG", global = true)]
    config: Option<Utf8PathBuf>,

    #[command(flatten)]
    registry: RegistryArgs,

    /// Log JSON lines
    #[arg(long, env = "REGVIEW_JSON_LOGS", global = true)]
    json_logs: bool,

    /// Log at debug level
    #[arg(short, long, env = "REGVIEW_VERBOSE", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct RegistryArgs {
    /// Registry hostname, with an optional port
    #[arg(long, env = "REGVIEW_REGISTRY_HOSTNAME", global = true)]
    registry_hostname: Option<String>,

    /// Username to log in to the registry with
    #[arg(long, env = "REGVIEW_REGISTRY_USER", global = true)]
    registry_user: Option<String>,

    /// Password to log in to the registry with
    #[arg(long, env = "REGVIEW_REGISTRY_PASSWORD", global = true, hide_env_values = true)]
    registry_password: Option<String>,

    /// Talk to the registry over HTTPS (true) or plain HTTP (false)
    #[arg(long, env = "REGVIEW_REGISTRY_TLS", global = true)]
    tls: Option<bool>,

    /// User-Agent sent to the registry
    #[arg(long, env = "REGVIEW_USER_AGENT", global = true)]
    user_agent: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the registry out as a static HTML site
    Generate(GenerateArgs),

    /// Serve registry pages over HTTP from an in-memory mirror
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Directory to write the site into [default: /tmp/generated-registry-html]
    #[arg(long, env = "REGVIEW_OUTPUT")]
    output: Option<Utf8PathBuf>,

    /// Path the site will be served from, used for links [default: /tmp/generated-registry-html]
    #[arg(long, env = "REGVIEW_ABSOLUTE_DIR")]
    absolute_dir: Option<String>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Address to listen on [default: 127.0.0.1:8093]
    #[arg(long, env = "REGVIEW_BIND_ADDR")]
    bind_addr: Option<SocketAddr>,

    /// How long to cache rendered pages, 0 caches forever [default: 10m]
    #[arg(long, env = "REGVIEW_CACHE_DURATION", value_parser = parse_duration)]
    cache_duration: Option<Duration>,

    /// Time between registry refreshes [default: 5m]
    #[arg(long, env = "REGVIEW_REFRESH_INTERVAL", value_parser = parse_duration)]
    refresh_interval: Option<Duration>,

    /// User-Agent substrings which get an empty response
    #[arg(long = "ignored-user-agent", env = "REGVIEW_IGNORED_USER_AGENTS", value_delimiter = ',')]
    ignored_user_agents: Vec<String>,

    /// Concurrent image info fetchers [default: 1]
    #[arg(long, env = "REGVIEW_IMAGE_WORKERS")]
    image_workers: Option<usize>,
}

impl Cli {
    /// Layer command line settings over the configuration file.
    fn apply(&self, config: &mut Config) {
        let registry = &mut config.registry;
        if let Some(hostname) = &self.registry.registry_hostname {
            registry.hostname = Some(hostname.clone());
        }
        if let Some(user) = &self.registry.registry_user {
            registry.user = Some(user.clone());
        }
        if let Some(password) = &self.registry.registry_password {
            registry.password = Some(password.clone().into());
        }
        if let Some(tls) = self.registry.tls {
            registry.tls = tls;
        }
        if let Some(user_agent) = &self.registry.user_agent {
            registry.user_agent = Some(user_agent.clone());
        }

        config.logging.json |= self.json_logs;
        config.logging.verbose |= self.verbose;

        match &self.command {
            Command::Generate(args) => {
                if let Some(output) = &args.output {
                    config.generate.output = output.clone();
                }
                if let Some(absolute_dir) = &args.absolute_dir {
                    config.generate.absolute_dir = absolute_dir.clone();
                }
            }
            Command::Serve(args) => {
                let serve = &mut config.serve;
                if let Some(bind_addr) = args.bind_addr {
                    serve.bind_addr = bind_addr;
                }
                if let Some(cache_duration) = args.cache_duration {
                    serve.cache_duration = cache_duration;
                }
                if let Some(refresh_interval) = args.refresh_interval {
                    serve.refresh_interval = refresh_interval;
                }
                if !args.ignored_user_agents.is_empty() {
                    serve.ignored_user_agents = args.ignored_user_agents.clone();
                }
                if let Some(image_workers) = args.image_workers {
                    serve.image_workers = image_workers;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    regview::logging::init(&config.logging).wrap_err("installing the log subscriber")?;

    match cli.command {
        Command::Generate(_) => generate(&config).await,
        Command::Serve(_) => serve(&config).await,
    }
}

async fn generate(config: &Config) -> eyre::Result<()> {
    let hostname = config.registry.hostname()?;
    let registry = HttpRegistry::new(config.registry.host()?);
    let filler = Filler::new(Arc::new(registry), hostname, &config.generate.absolute_dir);

    let summary = Generator::new(filler, config.generate.output.clone())
        .generate()
        .await?;
    tracing::info!(
        output = %config.generate.output,
        repositories = summary.written,
        "site written"
    );
    Ok(())
}

async fn serve(config: &Config) -> eyre::Result<()> {
    let hostname = config.registry.hostname()?;
    let registry = HttpRegistry::new(config.registry.host()?);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    regview::server::run(Arc::new(registry), hostname, &config.serve, cancel)
        .await
        .wrap_err_with(|| format!("serving on {}", config.serve.bind_addr))
}

/// Cancel `cancel` on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "listening for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "listening for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
    cancel.cancel();
}
