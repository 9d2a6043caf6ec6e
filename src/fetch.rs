use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub url: Url,
    pub html: String,
}

/// HTTP GET client shared by the crawler and the single-page scraper.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|err| Error::Config(format!("build http client: {err}")))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            timeout: config.fetch_timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Non-2xx responses are fetch errors. Bodies above the configured size
    /// are cut off rather than rejected.
    pub async fn fetch_html(&self, url: &Url) -> Result<FetchedPage> {
        tracing::debug!(url = %url, "fetch");
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|err| self.request_error(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url.as_str(), format!("HTTP {status}")));
        }

        let final_url = response.url().clone();
        let (html, truncated) = self.read_text_limited(url, response).await?;
        if truncated {
            tracing::warn!(url = %url, limit = self.max_body_bytes, "response body truncated");
        }

        Ok(FetchedPage {
            url: final_url,
            html,
        })
    }

    async fn read_text_limited(
        &self,
        url: &Url,
        mut response: reqwest::Response,
    ) -> Result<(String, bool)> {
        let mut out: Vec<u8> = Vec::new();
        let mut truncated = false;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| self.request_error(url, err))?
        {
            if out.len() + chunk.len() > self.max_body_bytes {
                let remaining = self.max_body_bytes.saturating_sub(out.len());
                out.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            out.extend_from_slice(&chunk);
        }

        Ok((String::from_utf8_lossy(&out).into_owned(), truncated))
    }

    fn request_error(&self, url: &Url, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                target: url.to_string(),
                after: self.timeout,
            }
        } else {
            Error::fetch(url.as_str(), err)
        }
    }
}
