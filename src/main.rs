use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use promptgate_auth::{JwksSettings, JwksValidator, NoKeySource};
use promptgate_config::{Config, ConfigWatcher, LogConfig, LogFormat};
use promptgate_provider::WsDialer;
use promptgate_proxy::AppState;
use promptgate_types::TokenValidator;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "promptgate", version, about = "promptgate: streaming AI gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway.
    Serve {
        /// Path to the YAML configuration file (hot-reloaded on change).
        /// Without it, configuration comes from `PROMPTGATE_*` variables.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the listening port (default: 4000).
        #[arg(short, long)]
        port: Option<u16>,
        /// Override the listening address (default: 127.0.0.1).
        #[arg(long)]
        host: Option<String>,
    },
    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, host } => cmd_serve(config, port, host).await,
        Commands::CheckConfig { config } => cmd_check_config(&config),
    }
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
) -> Result<()> {
    let (config, watcher) = match &config_path {
        Some(path) => {
            let watcher = Arc::new(
                ConfigWatcher::new(path.clone())
                    .map_err(|e| anyhow::anyhow!("config error: {e}"))?,
            );
            (watcher.arc(), Some(watcher))
        }
        None => {
            let config = Config::from_env().map_err(|e| anyhow::anyhow!("config error: {e}"))?;
            (Arc::new(arc_swap_from(config)), None)
        }
    };

    let snapshot = config.load_full();
    snapshot.validate().context("invalid configuration")?;
    let _log_guard = init_tracing(&snapshot.log)?;

    if let Some(watcher) = watcher {
        watcher.watch();
    }

    let http = promptgate_proxy::build_http_client(snapshot.proxy_url.as_deref());
    let validator: Arc<dyn TokenValidator> = if snapshot.auth.jwks_url.is_some() {
        let settings = JwksSettings::from_config(&snapshot.auth)?;
        Arc::new(JwksValidator::new(http, settings))
    } else {
        tracing::warn!("auth.jwks_url is not set; bearer tokens cannot be validated");
        Arc::new(NoKeySource)
    };
    if !snapshot.auth.required {
        tracing::warn!("auth.required is false; relay routes are open");
    }

    let state = AppState::new(Arc::clone(&config), validator, Arc::new(WsDialer));
    let app = promptgate_proxy::make_router(state);

    let addr = format!(
        "{}:{}",
        host.as_deref().unwrap_or(&snapshot.host),
        port.unwrap_or(snapshot.port)
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(
        %addr,
        environment = %snapshot.environment,
        version = env!("CARGO_PKG_VERSION"),
        "promptgate listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path).map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    config.validate().context("invalid configuration")?;
    println!(
        "{}: ok (listen {}:{}, completions model {}, realtime model {})",
        path.display(),
        config.host,
        config.port,
        config.completions.model,
        config.realtime.model
    );
    Ok(())
}

fn arc_swap_from(config: Config) -> arc_swap::ArcSwap<Config> {
    arc_swap::ArcSwap::from_pointee(config)
}

/// Installs the global subscriber. `RUST_LOG` overrides `log.level`.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the server.
fn init_tracing(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        EnvFilter, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .with_context(|| format!("invalid log level: {}", log.level))?;

    let (writer, guard) = match &log.file {
        Some(file) => {
            let file = Path::new(file);
            let dir = file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = file
                .file_name()
                .context("log.file must name a file")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_ansi(log.file.is_none()).with_writer(writer))
            .try_init()?,
    }
    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
