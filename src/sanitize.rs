//! Boilerplate removal for scraped pages.
//!
//! The steps run against one mutable tree and their order matters: anchors are
//! dropped before anything is captured, tables are captured before they are
//! removed, and body text is read last from what is left.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::error::{Error, Result};
use crate::formats::ScrapedPage;

/// Link texts marking interaction or navigation widgets. Matched as
/// substrings of the case-folded anchor text.
pub const LINK_STOPLIST: &[&str] = &[
    "read more",
    "click here",
    "learn more",
    "see more",
    "view more",
    "show more",
    "subscribe",
    "sign up",
    "sign in",
    "log in",
    "login",
    "register",
    "download",
    "share",
    "back to top",
    "skip to content",
    "بیشتر بخوانید",
    "ادامه مطلب",
    "ادامه خواندن",
    "کلیک کنید",
    "اینجا کلیک",
    "مشاهده بیشتر",
    "اشتراک",
    "عضویت",
    "ثبت نام",
    "ثبت‌نام",
    "ورود",
    "دانلود",
];

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static HEADINGS: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2, h3"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static NOISE: LazyLock<Selector> = LazyLock::new(|| {
    selector("nav, aside, footer, script, style, form, button, i, table")
});

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Parses `html` permissively and sanitizes it. `source` names the document
/// in errors.
pub fn sanitize_html(html: &str, source: &str) -> Result<ScrapedPage> {
    if html.trim().is_empty() {
        return Err(Error::parse(source, "empty document"));
    }
    let mut doc = Html::parse_document(html);
    if !doc.errors.is_empty() {
        tracing::trace!(source, errors = doc.errors.len(), "html parsed with recoverable errors");
    }
    Ok(sanitize(&mut doc))
}

pub fn sanitize(doc: &mut Html) -> ScrapedPage {
    let boilerplate = doc
        .select(&ANCHOR)
        .filter(|anchor| is_boilerplate_link(*anchor))
        .map(|anchor| anchor.id())
        .collect::<Vec<_>>();
    detach(doc, boilerplate);

    let title = doc.select(&TITLE).next().map(element_text);
    let headings = doc.select(&HEADINGS).map(element_text).collect::<Vec<_>>();
    let heading_ids = doc.select(&HEADINGS).map(|el| el.id()).collect::<Vec<_>>();

    let title_ids = doc.select(&TITLE).map(|el| el.id()).collect::<Vec<_>>();
    detach(doc, title_ids);

    // Headings stay attached until tables are read; a heading may sit in a cell.
    let tables = {
        let table_elements = doc.select(&TABLE).collect::<Vec<_>>();
        if table_elements.is_empty() {
            None
        } else {
            Some(crate::tables::extract_tables(table_elements))
        }
    };

    let mut noise = doc.select(&NOISE).map(|el| el.id()).collect::<Vec<_>>();
    noise.extend(heading_ids);
    detach(doc, noise);

    ScrapedPage {
        title,
        headings,
        tables,
        content: visible_text(doc),
    }
}

pub fn is_boilerplate_link(anchor: ElementRef<'_>) -> bool {
    let text = anchor
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    !text.is_empty() && LINK_STOPLIST.iter().any(|phrase| text.contains(phrase))
}

fn detach(doc: &mut Html, ids: Vec<ego_tree::NodeId>) {
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text nodes still attached to the tree, trimmed, one per line.
fn visible_text(doc: &Html) -> String {
    doc.tree
        .root()
        .descendants()
        .filter_map(|node| node.value().as_text())
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
