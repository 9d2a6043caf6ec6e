use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    datasetify::logging::init("info").context("init logging")?;

    let cli = datasetify::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        datasetify::cli::Command::Links(args) => {
            datasetify::crawl::run(args).await.context("links")?;
        }
        datasetify::cli::Command::Scrape(args) => {
            datasetify::scrape::run(args).await.context("scrape")?;
        }
        datasetify::cli::Command::Extract(args) => {
            datasetify::documents::run(args).await.context("extract")?;
        }
    }

    Ok(())
}
