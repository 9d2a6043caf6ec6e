//! Request pipeline shared by the CLI and the HTTP app.
//!
//! Each request moves through `received -> fetching/extracting -> token_check`
//! and ends `persisted`, `rejected` (over budget) or `failed`. Fetching and
//! extraction run under the overall request deadline; the token gate and the
//! write happen after it, so a timeout can never leave a half-written file.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::crawl::{CrawlOptions, Crawler};
use crate::documents::FormatRegistry;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::formats::{ExtractionSummary, InlineDataset, PageRecord, ScrapedPage};
use crate::store::DatasetStore;
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Fetching,
    Extracting,
    TokenCheck,
    Persisted,
    Rejected,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::TokenCheck => "token_check",
            Self::Persisted => "persisted",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Files,
    Page,
    Links,
}

impl RequestKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Page => "page",
            Self::Links => "links",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Files => "Files extracted and saved",
            Self::Page => "Web page scraped and saved",
            Self::Links => "Web links discovered and saved",
        }
    }
}

/// A file received from a caller, already on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Name as given by the caller; used in error messages.
    pub original_name: String,
    pub path: PathBuf,
}

/// The exact text that is counted and, if within budget, persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedDataset {
    pub body: String,
    pub token_size: usize,
}

impl SerializedDataset {
    pub fn new<T: Serialize + ?Sized>(dataset: &T, tokenizer: &Tokenizer) -> Result<Self> {
        let body = serde_json::to_string_pretty(dataset)
            .map_err(|err| Error::parse("dataset", format!("serialize: {err}")))?;
        let token_size = tokenizer.count_tokens(&body);
        Ok(Self { body, token_size })
    }

    pub fn check_budget(&self, max_token_size: usize) -> Result<()> {
        if self.token_size > max_token_size {
            return Err(Error::TokenLimit {
                token_size: self.token_size,
                limit: max_token_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DatasetAssembler {
    config: Arc<Config>,
    tokenizer: Arc<Tokenizer>,
    fetcher: Fetcher,
    crawler: Crawler,
    formats: Arc<FormatRegistry>,
    store: DatasetStore,
}

impl DatasetAssembler {
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        config.validate()?;
        let tokenizer = Arc::new(Tokenizer::for_model(&config.tokenizer_model)?);
        Self::with_parts(config, tokenizer, Arc::new(FormatRegistry::with_defaults()))
    }

    pub fn with_parts(
        config: Arc<Config>,
        tokenizer: Arc<Tokenizer>,
        formats: Arc<FormatRegistry>,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(&config)?;
        let crawler = Crawler::new(fetcher.clone(), CrawlOptions::from_config(&config));
        let store = DatasetStore::new(&config);
        Ok(Self {
            config,
            tokenizer,
            fetcher,
            crawler,
            formats,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Single page: the sanitized page is the dataset.
    pub async fn scrape_page(&self, url: &str) -> Result<(ScrapedPage, ExtractionSummary)> {
        let kind = RequestKind::Page;
        let page = self
            .within_deadline(kind, url, async {
                log_stage(kind, url, Stage::Fetching);
                crate::scrape::scrape_page(&self.fetcher, url).await
            })
            .await?;
        let summary = self.persist(kind, url, &page).await?;
        Ok((page, summary))
    }

    /// Same-site link discovery: the page records are the dataset.
    pub async fn discover_links(
        &self,
        url: &str,
    ) -> Result<(Vec<PageRecord>, ExtractionSummary)> {
        let kind = RequestKind::Links;
        let records = self
            .within_deadline(kind, url, async {
                log_stage(kind, url, Stage::Fetching);
                self.crawler.discover(url).await
            })
            .await?;
        let summary = self.persist(kind, url, &records).await?;
        Ok((records, summary))
    }

    /// Extracts every file, in order, and persists the combined dataset.
    pub async fn extract_files(&self, files: &[UploadedFile]) -> Result<ExtractionSummary> {
        let kind = RequestKind::Files;
        let target = files_target(files);
        let dataset = self.collect_files(kind, &target, files).await?;
        self.persist(kind, &target, &dataset).await
    }

    /// Like [`Self::extract_files`], but returns the dataset instead of
    /// writing it.
    pub async fn extract_files_inline(&self, files: &[UploadedFile]) -> Result<InlineDataset> {
        let kind = RequestKind::Files;
        let target = files_target(files);
        let dataset = self.collect_files(kind, &target, files).await?;
        let serialized = self.token_check(kind, &target, &dataset)?;
        Ok(InlineDataset {
            dataset,
            token_size: serialized.token_size,
        })
    }

    async fn collect_files(
        &self,
        kind: RequestKind,
        target: &str,
        files: &[UploadedFile],
    ) -> Result<Vec<serde_json::Value>> {
        if files.is_empty() {
            let err = Error::Validation("at least one file is required".to_string());
            log_failure(kind, target, &err);
            return Err(err);
        }

        self.within_deadline(kind, target, async {
            log_stage(kind, target, Stage::Extracting);
            let mut dataset = Vec::with_capacity(files.len());
            for file in files {
                if let Some(payload) = self.extract_one(file).await? {
                    dataset.push(payload);
                }
            }
            Ok(dataset)
        })
        .await
    }

    async fn extract_one(&self, file: &UploadedFile) -> Result<Option<serde_json::Value>> {
        let formats = Arc::clone(&self.formats);
        let path = file.path.clone();
        let extension = std::path::Path::new(&file.original_name)
            .extension()
            .or_else(|| file.path.extension())
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();

        let payload = tokio::task::spawn_blocking(move || formats.extract(&path, &extension))
            .await
            .map_err(|err| Error::parse(&file.original_name, format!("extractor failed: {err}")))?
            .map_err(|err| match err {
                Error::Parse { reason, .. } => Error::parse(&file.original_name, reason),
                other => other,
            })?;

        if payload.is_none() {
            tracing::info!(file = %file.original_name, "unsupported file type; skipped");
        }
        Ok(payload)
    }

    fn token_check<T: Serialize + ?Sized>(
        &self,
        kind: RequestKind,
        target: &str,
        dataset: &T,
    ) -> Result<SerializedDataset> {
        log_stage(kind, target, Stage::TokenCheck);
        let serialized = SerializedDataset::new(dataset, &self.tokenizer).inspect_err(|err| {
            log_failure(kind, target, err);
        })?;

        if let Err(err) = serialized.check_budget(self.config.max_token_size) {
            tracing::info!(
                kind = kind.as_str(),
                request = target,
                stage = Stage::Rejected.as_str(),
                token_size = serialized.token_size,
                limit = self.config.max_token_size,
                "dataset over token budget"
            );
            return Err(err);
        }
        Ok(serialized)
    }

    async fn persist<T: Serialize + ?Sized>(
        &self,
        kind: RequestKind,
        target: &str,
        dataset: &T,
    ) -> Result<ExtractionSummary> {
        let serialized = self.token_check(kind, target, dataset)?;
        let stored = self
            .store
            .persist(&serialized.body)
            .await
            .inspect_err(|err| log_failure(kind, target, err))?;

        tracing::info!(
            kind = kind.as_str(),
            request = target,
            stage = Stage::Persisted.as_str(),
            file_name = %stored.file_name,
            token_size = serialized.token_size,
            "dataset persisted"
        );
        Ok(ExtractionSummary {
            message: kind.message().to_string(),
            file_name: stored.file_name,
            token_size: serialized.token_size,
        })
    }

    async fn within_deadline<T>(
        &self,
        kind: RequestKind,
        target: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        log_stage(kind, target, Stage::Received);
        let deadline = self.config.request_timeout;
        let result = match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                target: target.to_string(),
                after: deadline,
            }),
        };
        result.inspect_err(|err| log_failure(kind, target, err))
    }
}

fn files_target(files: &[UploadedFile]) -> String {
    files
        .iter()
        .map(|file| file.original_name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn log_stage(kind: RequestKind, target: &str, stage: Stage) {
    tracing::info!(kind = kind.as_str(), request = target, stage = stage.as_str(), "request stage");
}

fn log_failure(kind: RequestKind, target: &str, err: &Error) {
    tracing::warn!(
        kind = kind.as_str(),
        request = target,
        stage = Stage::Failed.as_str(),
        error_kind = err.kind(),
        error = %err,
        "request failed"
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn assembler(dir: &std::path::Path, max_token_size: usize) -> DatasetAssembler {
        let config = Config {
            output_dir: dir.join("datasets"),
            upload_dir: dir.join("uploads"),
            max_token_size,
            ..Config::default()
        };
        DatasetAssembler::from_config(Arc::new(config)).unwrap()
    }

    fn upload(dir: &std::path::Path, name: &str, contents: &str) -> UploadedFile {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        UploadedFile {
            original_name: name.to_string(),
            path,
        }
    }

    fn dataset_files(dir: &std::path::Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir.join("datasets")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn budget_is_inclusive() {
        let serialized = SerializedDataset {
            body: String::new(),
            token_size: 10,
        };
        assert!(serialized.check_budget(10).is_ok());
        assert!(matches!(
            serialized.check_budget(9).unwrap_err(),
            Error::TokenLimit {
                token_size: 10,
                limit: 9
            }
        ));
    }

    #[tokio::test]
    async fn files_are_extracted_in_order_and_persisted() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let assembler = assembler(temp.path(), 10_000);
        let files = vec![
            upload(temp.path(), "a.txt", "first\tfile"),
            upload(temp.path(), "skip.png", "binary"),
            upload(temp.path(), "b.json", r#"{"k": 1}"#),
        ];

        let summary = assembler.extract_files(&files).await?;
        let saved = std::fs::read_to_string(temp.path().join("datasets").join(&summary.file_name))?;
        let value: serde_json::Value = serde_json::from_str(&saved)?;
        assert_eq!(value, json!([{ "data": "firstfile" }, { "k": 1 }]));
        assert_eq!(summary.token_size, assembler.tokenizer().count_tokens(&saved));
        Ok(())
    }

    #[tokio::test]
    async fn inline_extraction_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let assembler = assembler(temp.path(), 10_000);
        let files = vec![upload(temp.path(), "notes.md", "hello")];

        let inline = assembler.extract_files_inline(&files).await?;
        assert_eq!(inline.dataset, vec![json!({ "data": "hello" })]);
        assert!(inline.token_size > 0);
        assert!(dataset_files(temp.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn over_budget_dataset_is_not_persisted() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let assembler = assembler(temp.path(), 5);
        let files = vec![upload(
            temp.path(),
            "long.txt",
            "many words that easily exceed a five token budget",
        )];

        let err = assembler.extract_files(&files).await.unwrap_err();
        assert!(matches!(err, Error::TokenLimit { limit: 5, .. }));
        assert!(dataset_files(temp.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn empty_file_list_is_validation_error() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let err = assembler(temp.path(), 10_000)
            .extract_files(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn extractor_errors_name_the_uploaded_file() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let assembler = assembler(temp.path(), 10_000);
        let mut file = upload(temp.path(), "stored_123.json", "{broken");
        file.original_name = "report.json".to_string();

        let err = assembler.extract_files(&[file]).await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("report.json"), "{err}");
        assert!(dataset_files(temp.path()).is_empty());
        Ok(())
    }
}
