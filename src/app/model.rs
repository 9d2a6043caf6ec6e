use serde::{Deserialize, Serialize};

/// Body of `POST /web-links` and `POST /web-scrape`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: Option<String>,
}

impl UrlRequest {
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitedBody {
    pub error: String,
}

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Try again later.";
