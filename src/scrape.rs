use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::ScrapeArgs;
use crate::config::Config;
use crate::crawl::normalize_seed;
use crate::dataset::DatasetAssembler;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::formats::ScrapedPage;

pub async fn run(args: ScrapeArgs) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("load config")?;
    if let Some(out_dir) = args.out_dir {
        config.output_dir = out_dir.into();
    }
    if let Some(max_token_size) = args.max_token_size {
        config.max_token_size = max_token_size;
    }

    let assembler =
        DatasetAssembler::from_config(Arc::new(config)).context("build dataset assembler")?;
    let (page, summary) = assembler
        .scrape_page(&args.url)
        .await
        .with_context(|| format!("scrape {}", args.url))?;
    tracing::info!(
        title = page.title.as_deref().unwrap_or_default(),
        headings = page.headings.len(),
        tables = page.tables.as_ref().map_or(0, Vec::len),
        "page scraped"
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serialize summary")?
    );
    Ok(())
}

/// Fetches one page and reduces it to title, headings, tables and text.
pub async fn scrape_page(fetcher: &Fetcher, url: &str) -> Result<ScrapedPage> {
    let url = normalize_seed(url)?;
    let page = fetcher.fetch_html(&url).await?;
    crate::sanitize::sanitize_html(&page.html, page.url.as_str())
}
