use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, LazyLock};

use anyhow::Context as _;
use scraper::{Html, Selector};
use url::Url;

use crate::cli::LinksArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{FetchedPage, Fetcher};
use crate::formats::{NO_TITLE, PageRecord};

static ANCHOR_HREF: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector is valid"));

pub async fn run(args: LinksArgs) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("load config")?;
    if let Some(max_pages) = args.max_pages {
        config.max_pages = max_pages;
    }
    if let Some(max_depth) = args.max_depth {
        config.max_depth = max_depth;
    }
    if let Some(out_dir) = args.out_dir {
        config.output_dir = out_dir.into();
    }
    config.validate().context("validate config")?;

    let assembler = crate::dataset::DatasetAssembler::from_config(Arc::new(config))
        .context("build dataset assembler")?;
    let (records, saved) = assembler
        .discover_links(&args.url)
        .await
        .with_context(|| format!("discover links from {}", args.url))?;
    tracing::info!(file_name = %saved.file_name, token_size = saved.token_size, "links saved");

    println!(
        "{}",
        serde_json::to_string_pretty(&records).context("serialize page records")?
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    pub max_pages: usize,
    pub max_depth: u32,
    pub workers: usize,
}

impl CrawlOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: config.max_pages,
            max_depth: config.max_depth,
            workers: config.crawl_workers(),
        }
    }
}

/// Same-site link discovery from a seed page.
#[derive(Debug, Clone)]
pub struct Crawler {
    fetcher: Fetcher,
    options: CrawlOptions,
}

impl Crawler {
    pub fn new(fetcher: Fetcher, options: CrawlOptions) -> Self {
        Self { fetcher, options }
    }

    /// Returns one record per distinct canonical page, seed included. The
    /// first failed fetch aborts the whole crawl.
    pub async fn discover(&self, seed: &str) -> Result<Vec<PageRecord>> {
        let seed_url = normalize_seed(seed)?;
        let scope = canonical_url(&seed_url);
        let max_pages = self.options.max_pages.max(1);

        let mut visited: HashSet<String> = HashSet::from([scope.clone()]);
        let mut discovered: Vec<Url> = vec![seed_url.clone()];
        let mut fetched: HashMap<usize, PageRecord> = HashMap::new();
        let mut frontier: VecDeque<(usize, u32)> = VecDeque::from([(0, 0)]);

        while let Some((index, depth)) = frontier.pop_front() {
            if visited.len() >= max_pages {
                break;
            }
            if depth >= self.options.max_depth {
                continue;
            }

            let page = self.fetcher.fetch_html(&discovered[index]).await?;
            fetched.insert(index, page_record(&page));

            // Relative links resolve against the URL the page was served from.
            for href in anchor_hrefs(&page.html) {
                if visited.len() >= max_pages {
                    break;
                }
                let Some(link) = normalize_link(&page.url, &href) else {
                    continue;
                };
                if !link.starts_with(&scope) || visited.contains(&link) {
                    continue;
                }
                let Ok(link_url) = Url::parse(&link) else {
                    continue;
                };
                visited.insert(link);
                discovered.push(link_url);
                frontier.push_back((discovered.len() - 1, depth + 1));
            }
        }

        tracing::info!(
            seed = %seed_url,
            discovered = discovered.len(),
            max_pages,
            "link discovery finished"
        );

        let pending = discovered
            .iter()
            .enumerate()
            .filter(|(index, _)| !fetched.contains_key(index))
            .map(|(index, url)| (index, url.clone()))
            .collect::<Vec<_>>();
        fetched.extend(self.fetch_records(pending).await?);

        let mut links: HashSet<String> = HashSet::new();
        let mut records = Vec::with_capacity(discovered.len());
        for index in 0..discovered.len() {
            let Some(record) = fetched.remove(&index) else {
                continue;
            };
            if links.insert(record.link.clone()) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn fetch_records(&self, pending: Vec<(usize, Url)>) -> Result<Vec<(usize, PageRecord)>> {
        let workers = self.options.workers.max(1);
        let mut queue = pending.into_iter();
        let mut join_set = tokio::task::JoinSet::new();
        let mut out = Vec::new();

        loop {
            while join_set.len() < workers {
                let Some((index, url)) = queue.next() else {
                    break;
                };
                let fetcher = self.fetcher.clone();
                join_set.spawn(async move {
                    let page = fetcher.fetch_html(&url).await;
                    (index, page)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (index, page) =
                joined.map_err(|err| Error::fetch("crawl worker", format!("task failed: {err}")))?;
            // Returning here drops the join set, which aborts the other fetches.
            let page = page?;
            out.push((index, page_record(&page)));
        }

        Ok(out)
    }
}

/// Adds `http://` when the input has no scheme and rejects anything that is
/// not an http(s) URL.
pub fn normalize_seed(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Validation("url is required".to_string()));
    }
    let candidate = if has_scheme(raw) {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|err| Error::Validation(format!("invalid url {raw:?}: {err}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Validation(format!("url must be http/https: {raw}")));
    }
    if url.host_str().is_none() {
        return Err(Error::Validation(format!("url must have a host: {raw}")));
    }
    Ok(url)
}

/// True when `raw` starts with `scheme://`. A `://` later in the path or
/// query does not count.
fn has_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolves `href` against `base` and canonicalizes it. Non-http(s) targets
/// yield `None`.
pub fn normalize_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    let url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    Some(canonical_url(&url))
}

/// Fragment removed, leading `www.` collapsed, trailing slashes stripped.
/// Applying it to its own output is a no-op.
pub fn canonical_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    if let Some(host) = canonical.host_str()
        && let Some(bare) = host.strip_prefix("www.")
        && !bare.is_empty()
    {
        let bare = bare.to_string();
        let _ = canonical.set_host(Some(&bare));
    }

    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);

    let out = canonical.to_string();
    if canonical.path() == "/" && canonical.query().is_none() {
        return out.trim_end_matches('/').to_string();
    }
    out
}

fn page_record(page: &FetchedPage) -> PageRecord {
    PageRecord {
        title: page_title(&page.html).unwrap_or_else(|| NO_TITLE.to_string()),
        link: canonical_url(&page.url),
    }
}

fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&TITLE)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

fn anchor_hrefs(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR_HREF)
        .filter_map(|el| el.value().attr("href"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://x.test/docs/").unwrap()
    }

    #[test]
    fn seed_without_scheme_gets_http() {
        let url = normalize_seed("example.com/path").unwrap();
        assert_eq!(url.as_str(), "http://example.com/path");
    }

    #[test]
    fn url_in_query_does_not_count_as_scheme() {
        let url = normalize_seed("x.test/login?next=http://x.test/a").unwrap();
        assert_eq!(url.host_str(), Some("x.test"));
        assert_eq!(url.path(), "/login");
        assert_eq!(url.query(), Some("next=http://x.test/a"));

        let url = normalize_seed("HTTPS://x.test/a").unwrap();
        assert_eq!(url.as_str(), "https://x.test/a");
    }

    #[test]
    fn seed_must_be_http() {
        assert!(matches!(
            normalize_seed("ftp://example.com").unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(normalize_seed("  ").unwrap_err(), Error::Validation(_)));
    }

    #[test]
    fn canonical_url_strips_fragment_slash_and_www() {
        let url = Url::parse("https://www.example.com/a/#top").unwrap();
        assert_eq!(canonical_url(&url), "https://example.com/a");

        let root = Url::parse("https://www.example.com/").unwrap();
        assert_eq!(canonical_url(&root), "https://example.com");
    }

    #[test]
    fn canonical_url_keeps_query() {
        let url = Url::parse("http://x.test/search?q=1#frag").unwrap();
        assert_eq!(canonical_url(&url), "http://x.test/search?q=1");
    }

    #[test]
    fn normalization_is_idempotent() {
        let hrefs = [
            "/a/",
            "a#frag",
            "../up/",
            "https://www.x.test/",
            "http://x.test//deep//",
            "?page=2",
            "",
        ];
        for href in hrefs {
            let once = normalize_link(&base(), href).unwrap();
            let twice = normalize_link(&base(), &once).unwrap();
            assert_eq!(once, twice, "href={href}");
        }
    }

    #[test]
    fn relative_links_resolve_against_page() {
        assert_eq!(
            normalize_link(&base(), "intro#top").as_deref(),
            Some("http://x.test/docs/intro")
        );
        assert_eq!(
            normalize_link(&base(), "/outside/").as_deref(),
            Some("http://x.test/outside")
        );
    }

    #[test]
    fn non_http_links_are_ignored() {
        assert_eq!(normalize_link(&base(), "mailto:a@x.test"), None);
        assert_eq!(normalize_link(&base(), "javascript:void(0)"), None);
    }

    #[test]
    fn hrefs_and_title_are_read_from_html() {
        let html = r#"<html><head><title> T </title></head>
            <body><a href="/a">A</a><a>no href</a><a href="b">B</a></body></html>"#;
        assert_eq!(anchor_hrefs(html), vec!["/a", "b"]);
        assert_eq!(page_title(html).as_deref(), Some("T"));
        assert_eq!(page_title("<p>untitled</p>"), None);
    }
}
