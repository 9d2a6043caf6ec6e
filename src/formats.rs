use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Title used for discovered pages without a `<title>`.
pub const NO_TITLE: &str = "No title";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub title: String,
    pub link: String,
}

/// Header label -> cell text.
pub type RowRecord = BTreeMap<String, String>;

pub type TableBlock = Vec<RowRecord>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub title: Option<String>,
    pub headings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableBlock>>,
    pub content: String,
}

/// Result of a persisted extraction, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub message: String,
    pub file_name: String,
    pub token_size: usize,
}

/// Dataset returned inline instead of being persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineDataset {
    pub dataset: Vec<serde_json::Value>,
    pub token_size: usize,
}
