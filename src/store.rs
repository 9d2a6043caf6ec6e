use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::config::Config;
use crate::error::{Error, Result};

const MAX_NAME_ATTEMPTS: usize = 16;

/// A file written under a generated name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
}

/// Writes datasets and uploads into their directories, creating them on
/// demand. Files are created with `create_new`, so two requests can never
/// write to the same path.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    output_dir: PathBuf,
    upload_dir: PathBuf,
    base_name: String,
}

impl DatasetStore {
    pub fn new(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            upload_dir: config.upload_dir.clone(),
            base_name: config.dataset_base_name.clone(),
        }
    }

    pub async fn persist(&self, body: &str) -> Result<StoredFile> {
        let (mut file, stored) =
            create_unique(&self.output_dir, Some(&self.base_name), Some("json")).await?;

        let written = async {
            file.write_all(body.as_bytes()).await?;
            file.flush().await
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&stored.path).await;
            return Err(Error::io("write dataset", &stored.path, err));
        }

        tracing::debug!(path = %stored.path.display(), bytes = body.len(), "dataset written");
        Ok(stored)
    }

    /// Opens a fresh upload file that keeps the extension of `original_name`.
    pub async fn create_upload(&self, original_name: &str) -> Result<(fs::File, StoredFile)> {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|ext| ext.to_str());
        create_unique(&self.upload_dir, None, extension).await
    }

    pub async fn discard(&self, stored: &StoredFile) {
        if let Err(err) = fs::remove_file(&stored.path).await {
            tracing::warn!(path = %stored.path.display(), ?err, "failed to remove file");
        }
    }
}

/// `{base}_{YYYYMMDDHHMMSS}_{7 digits}.{ext}`; base and extension are optional.
pub fn unique_file_name(base: Option<&str>, extension: Option<&str>) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let suffix = 1_000_000 + (uuid::Uuid::new_v4().as_u128() % 9_000_000) as u32;

    let mut name = match base {
        Some(base) => format!("{base}_{timestamp}_{suffix}"),
        None => format!("{timestamp}_{suffix}"),
    };
    if let Some(extension) = extension.filter(|ext| !ext.is_empty()) {
        name.push('.');
        name.push_str(extension);
    }
    name
}

async fn create_unique(
    dir: &Path,
    base: Option<&str>,
    extension: Option<&str>,
) -> Result<(fs::File, StoredFile)> {
    fs::create_dir_all(dir)
        .await
        .map_err(|err| Error::io("create directory", dir, err))?;

    for _ in 0..MAX_NAME_ATTEMPTS {
        let file_name = unique_file_name(base, extension);
        let path = dir.join(&file_name);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, StoredFile { file_name, path })),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "generated name taken; retrying");
            }
            Err(err) => return Err(Error::io("create file", path, err)),
        }
    }

    Err(Error::io(
        "create file",
        dir,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "no free generated file name",
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> DatasetStore {
        DatasetStore::new(&Config {
            output_dir: dir.join("datasets"),
            upload_dir: dir.join("uploads"),
            ..Config::default()
        })
    }

    #[test]
    fn generated_names_follow_timestamp_scheme() {
        let name = unique_file_name(Some("dataset"), Some("json"));
        let stem = name.strip_suffix(".json").unwrap();
        let parts = stem.split('_').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3, "name={name}");
        assert_eq!(parts[0], "dataset");
        assert_eq!(parts[1].len(), 14);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 7);

        let bare = unique_file_name(None, None);
        assert_eq!(bare.split('_').count(), 2);
        assert!(!bare.contains('.'));
    }

    #[tokio::test]
    async fn persist_creates_directory_and_writes_body() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = store(temp.path());

        let first = store.persist("{\"a\":1}").await?;
        let second = store.persist("{\"a\":2}").await?;
        assert_ne!(first.path, second.path);
        assert_eq!(std::fs::read_to_string(&first.path)?, "{\"a\":1}");
        assert!(first.path.starts_with(temp.path().join("datasets")));
        assert!(first.file_name.starts_with("dataset_"));
        Ok(())
    }

    #[tokio::test]
    async fn uploads_keep_their_extension() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = store(temp.path());

        let (_file, stored) = store.create_upload("Report.Final.PDF").await?;
        assert!(stored.file_name.ends_with(".PDF"));
        assert!(stored.path.exists());

        store.discard(&stored).await;
        assert!(!stored.path.exists());
        Ok(())
    }
}
