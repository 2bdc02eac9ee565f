//! bucketgate: serve objects over HTTP from S3 or a local directory.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bucketgate::config::{Config, LogFormat, LoggingConfig, ServiceKind};
use bucketgate::sigv4::{self, Credentials, SigningContext};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "bucketgate",
    version,
    about = "Serve objects from S3 or a local directory over HTTP"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true, default_value = "bucketgate.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve {
        /// Override the bind address (host:port).
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Print a presigned GET URL for an object key and exit.
    Presign {
        /// Object key, before the configured prefix is applied.
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = bucketgate::config::load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);
    config.apply_env_fallbacks();

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Presign { key } => presign(&config, &key),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let bind_addr =
        bind.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    let storage = bucketgate::storage::build_backend(&config)?;
    info!("Storage backend: {}", storage.name());

    if config.observability.metrics {
        let metrics_addr: SocketAddr = config
            .observability
            .metrics_listen
            .parse()
            .with_context(|| {
                format!(
                    "invalid observability.metrics_listen '{}'",
                    config.observability.metrics_listen
                )
            })?;
        bucketgate::metrics::install_exporter(metrics_addr)?;
        info!("Prometheus metrics listening on {}", metrics_addr);
    }

    let state = Arc::new(bucketgate::AppState { config, storage });
    let app = bucketgate::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("bucketgate listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bucketgate shut down");
    Ok(())
}

fn presign(config: &Config, key: &str) -> anyhow::Result<()> {
    if config.storage.service != ServiceKind::S3 {
        bail!("presign requires storage.service: s3");
    }

    let s3 = &config.storage.s3;
    let context = SigningContext::new(
        &s3.endpoint_url,
        s3.region.clone(),
        s3.bucket.clone(),
        &s3.addressing_style,
        s3.presign_expires_seconds,
    )?;
    let credentials = Credentials::new(s3.access_key_id.clone(), s3.secret_access_key.clone());

    let presigned = sigv4::presign_get(&credentials, &context, &format!("{}{key}", s3.prefix));
    println!("{}", presigned.url);
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
