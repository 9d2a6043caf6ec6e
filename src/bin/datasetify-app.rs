use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use datasetify::app::{AppState, router};
use datasetify::config::Config;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: SocketAddr,

    /// Base directory for `uploads/` and `datasets/` (default: config).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Requests per client IP per minute; 0 disables limiting (default: config).
    #[arg(long)]
    rate_limit: Option<u32>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    datasetify::logging::init("info,tower_http=info")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting datasetify-app");

    let mut config = Config::from_env().context("load config")?;
    if let Some(data_dir) = &args.data_dir {
        config.upload_dir = data_dir.join("uploads");
        config.output_dir = data_dir.join("datasets");
    }
    if let Some(limit) = args.rate_limit {
        config.rate_limit_per_minute = limit;
    }
    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        output_dir = %config.output_dir.display(),
        max_token_size = config.max_token_size,
        rate_limit_per_minute = config.rate_limit_per_minute,
        "config loaded"
    );

    let state = AppState::from_config(Arc::new(config)).context("build app state")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
