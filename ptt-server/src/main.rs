//! # PTT Server
//!
//! Host process of the penetration-testing console.
//!
//! On start it opens the database, launches every module executable found in
//! the plugins directory, mounts their routes under `/plugin/{id}` and serves
//! the console over HTTP until interrupted.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser};
use ptt_server::{
    AppState, create_app, db,
    infra::config::{Config, ConfigLoad, ConfigLoader},
    plugins::{PluginRegistry, PluginSupervisor},
    session::SessionManager,
    store::{ScopedStore, StoreServer},
};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Open connections (event streams mostly) get this long to finish once a
/// shutdown signal arrives.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "ptt-server")]
#[command(about = "Security-testing console host with out-of-process modules")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// TOML configuration file (defaults to ./ptt.toml or ./config/ptt.toml)
    #[arg(short, long, env = "PTT_CONFIG")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Directory scanned for module executables (overrides config)
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// SQLite database URL (overrides config)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;
    run_server(config).await
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = args.config.clone() {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if let Some(dir) = args.plugins_dir.clone() {
        config.plugins.dir = dir;
    }
    if let Some(url) = args.database.clone() {
        config.database.url = url;
    }

    init_tracing(config.logging.json);

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let pool = db::connect(&config.database.url)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    db::initialize_schema(&pool)
        .await
        .context("failed to initialize database schema")?;
    let seeded = db::seed_root_user(&pool, &config.auth.root_password)
        .await
        .context("failed to create the root account")?;
    if seeded && config.auth.is_default_root_password() {
        warn!("root account uses the default password; set ROOT_PASSWORD");
    }

    let store = ScopedStore::new(pool.clone());
    let mut store_server = StoreServer::bind(&config.plugins.socket_dir, store.clone())
        .context("failed to bind the store socket")?;

    let shutdown = CancellationToken::new();
    let sessions = Arc::new(SessionManager::new(&config.sessions));
    let reaper = sessions.spawn_reaper(config.sessions.gc_interval, shutdown.child_token());

    let supervisor =
        PluginSupervisor::new(config.plugins.clone(), store_server.path().to_path_buf());
    let mut registry = PluginRegistry::new();
    let started = supervisor.start_all(&mut registry).await;
    info!(started, dir = %config.plugins.dir.display(), "plugins loaded");
    let plugins = Arc::new(registry);

    let state = AppState {
        config: Arc::clone(&config),
        pool: pool.clone(),
        sessions,
        plugins: Arc::clone(&plugins),
        store,
    };
    let result = serve(state, &config, shutdown.clone()).await;

    shutdown.cancel();
    supervisor.shutdown(&plugins).await;
    store_server.shutdown().await;
    if let Err(err) = reaper.await {
        warn!(error = %err, "session reaper ended abnormally");
    }
    pool.close().await;
    info!("shutdown complete");
    result
}

async fn serve(
    state: AppState,
    config: &Config,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "PTT server listening");
    if !config.sessions.secure_cookie {
        warn!("session cookies are sent without the Secure attribute");
    }

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .into_future();
    let drain_deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(DRAIN_TIMEOUT).await;
    };

    tokio::select! {
        result = server => result.context("HTTP server failed"),
        () = drain_deadline => {
            warn!(timeout = ?DRAIN_TIMEOUT, "connections still open after shutdown; closing them");
            Ok(())
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM and cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
        () = shutdown.cancelled() => {}
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
