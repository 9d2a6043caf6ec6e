use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover same-site pages from a seed URL and save them as a dataset.
    Links(LinksArgs),
    /// Scrape one page into title, headings, tables and text.
    Scrape(ScrapeArgs),
    /// Extract local files into one dataset.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
pub struct LinksArgs {
    /// Seed URL; `http://` is assumed when no scheme is given.
    #[arg(long)]
    pub url: String,

    /// Maximum pages to discover (default: config).
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Maximum link hops from the seed (default: config).
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Directory for the saved dataset (default: config).
    #[arg(long)]
    pub out_dir: Option<String>,
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Page URL; `http://` is assumed when no scheme is given.
    #[arg(long)]
    pub url: String,

    /// Token budget of the saved dataset (default: config).
    #[arg(long)]
    pub max_token_size: Option<usize>,

    /// Directory for the saved dataset (default: config).
    #[arg(long)]
    pub out_dir: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Input files (.pdf .docx .doc .csv .xls .xlsx .txt .md .json).
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Token budget of the dataset (default: config).
    #[arg(long)]
    pub max_token_size: Option<usize>,

    /// Print the dataset instead of saving it.
    #[arg(long)]
    pub inline: bool,

    /// Directory for the saved dataset (default: config).
    #[arg(long)]
    pub out_dir: Option<String>,
}
