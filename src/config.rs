use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const ENV_PREFIX: &str = "DATASETIFY_";

/// Limits and locations shared by every request. Built once at startup and
/// handed to components behind an `Arc`; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Prefix of persisted dataset file names.
    pub dataset_base_name: String,

    pub max_file_size: u64,
    /// Upper bound of a whole multipart request body.
    pub max_request_size: usize,
    pub max_token_size: usize,

    pub max_pages: usize,
    /// Link hops followed from the seed during discovery.
    pub max_depth: u32,
    pub crawl_concurrency: usize,

    pub tokenizer_model: String,

    pub fetch_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: String,

    /// Requests per client per minute; 0 disables the limiter.
    pub rate_limit_per_minute: u32,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("datasets"),
            dataset_base_name: "dataset".to_string(),
            max_file_size: 10 * 1024 * 1024,
            max_request_size: 64 * 1024 * 1024,
            max_token_size: 10_000,
            max_pages: 20,
            max_depth: 1,
            crawl_concurrency: 4,
            tokenizer_model: crate::tokenizer::DEFAULT_MODEL.to_string(),
            fetch_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(120),
            max_body_bytes: 5 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit_per_minute: 10,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "https://yourfrontend.com".to_string(),
            ],
        }
    }
}

impl Config {
    /// Defaults overlaid with `DATASETIFY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(&format!("{ENV_PREFIX}{key}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(dir) = var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("DATASET_BASE_NAME") {
            config.dataset_base_name = name;
        }
        if let Some(v) = parse_var(&var, "MAX_FILE_SIZE")? {
            config.max_file_size = v;
        }
        if let Some(v) = parse_var(&var, "MAX_REQUEST_SIZE")? {
            config.max_request_size = v;
        }
        if let Some(v) = parse_var(&var, "MAX_TOKEN_SIZE")? {
            config.max_token_size = v;
        }
        if let Some(v) = parse_var(&var, "MAX_PAGES")? {
            config.max_pages = v;
        }
        if let Some(v) = parse_var(&var, "MAX_DEPTH")? {
            config.max_depth = v;
        }
        if let Some(v) = parse_var(&var, "CRAWL_CONCURRENCY")? {
            config.crawl_concurrency = v;
        }
        if let Some(model) = var("TOKENIZER_MODEL") {
            config.tokenizer_model = model;
        }
        if let Some(secs) = parse_var::<u64>(&var, "FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = parse_var(&var, "MAX_BODY_BYTES")? {
            config.max_body_bytes = v;
        }
        if let Some(agent) = var("USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(v) = parse_var(&var, "RATE_LIMIT_PER_MINUTE")? {
            config.rate_limit_per_minute = v;
        }
        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(Error::Config("max_pages must be > 0".to_string()));
        }
        if self.crawl_concurrency == 0 {
            return Err(Error::Config("crawl_concurrency must be > 0".to_string()));
        }
        if self.fetch_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(Error::Config("timeouts must be > 0".to_string()));
        }
        if self.dataset_base_name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "dataset_base_name must not contain path separators: {}",
                self.dataset_base_name
            )));
        }
        Ok(())
    }

    /// Workers used for page fetches of one crawl.
    pub fn crawl_workers(&self) -> usize {
        self.crawl_concurrency.min(self.max_pages).max(1)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = var(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|err| Error::Config(format!("invalid {ENV_PREFIX}{key}={raw:?}: {err}")))
}
