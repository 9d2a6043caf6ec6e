use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of one extraction request. Every variant aborts the whole request;
/// nothing is persisted once one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fetch failed: {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("parse failed: {target}: {reason}")]
    Parse { target: String, reason: String },

    #[error("Token size: {token_size} - Max token limit exceeded (limit {limit})")]
    TokenLimit { token_size: usize, limit: usize },

    #[error("File size limit exceeded: > {file_name}")]
    FileSize { file_name: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("timed out after {}s: {target}", .after.as_secs())]
    Timeout {
        target: String,
        after: std::time::Duration,
    },

    #[error("{context}: {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Parse { .. } => "parse",
            Self::TokenLimit { .. } => "token_limit",
            Self::FileSize { .. } => "file_size",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io",
        }
    }
}
