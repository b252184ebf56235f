//! Family-agnostic heuristic pass
//!
//! One redirect-following fetch, then cheap guesses: a link whose text says
//! "download", a shortener's skip control, the redirect target itself, or
//! any file URL in the markup.

use crate::deadline::Deadline;
use crate::error::StageError;
use crate::extract::{absolutize, file_url_regex, is_qualifying};
use crate::fetch::{element_text, Fetcher, HttpRequest};
use crate::schema::Hit;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

const LINK_WORDS: &[&str] = &["download", "get", "fetch", "retrieve"];

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static SKIP_CONTROLS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a#skip_button[href], a#proceed[href], a#continue[href]").unwrap());
static GENERIC_FILE: LazyLock<Regex> = LazyLock::new(|| {
    file_url_regex(&[
        "mp4", "mkv", "avi", "mp3", "zip", "rar", "pdf", "doc", "docx", "exe", "apk", "jpg", "png",
    ])
});

/// Pure part of the pass, over an already fetched page.
pub fn scan(source_url: &str, final_url: &Url, html: &str) -> Option<Hit> {
    let doc = Html::parse_document(html);

    let worded = doc
        .select(&ANCHORS)
        .filter(|a| {
            let text = element_text(a).to_lowercase();
            LINK_WORDS.iter().any(|w| text.contains(w))
        })
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| href.starts_with("http"))
        .find(|href| is_qualifying(href));
    if let Some(href) = worded {
        return Some(Hit::new(href, "generic"));
    }

    let skip = doc
        .select(&SKIP_CONTROLS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolutize(final_url, href))
        .find(|u| is_qualifying(u));
    if let Some(url) = skip {
        return Some(Hit::new(url, "shortener"));
    }

    if final_url.as_str() != source_url && is_qualifying(final_url.as_str()) {
        return Some(Hit::new(final_url.as_str(), "generic_redirect"));
    }

    GENERIC_FILE
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|u| is_qualifying(u))
        .map(|u| Hit::new(u, "generic_file"))
}

pub struct GenericPass<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub user_agent: &'a str,
    pub fetch_timeout: Duration,
    pub deadline: Deadline,
}

impl GenericPass<'_> {
    pub async fn run(&self, url: &str) -> Result<Hit, StageError> {
        let source = Url::parse(url).map_err(|e| StageError::not_found(format!("bad url: {}", e)))?;
        let timeout = self.deadline.bound(self.fetch_timeout)?;
        let response = self
            .fetcher
            .send(HttpRequest::get(url).header("User-Agent", self.user_agent), timeout)
            .await?;
        let final_url = Url::parse(&response.url).unwrap_or(source);
        scan(url, &final_url, &response.body)
            .ok_or_else(|| StageError::not_found("generic heuristics found nothing"))
    }
}
