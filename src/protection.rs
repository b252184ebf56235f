//! Bot-protection bypass: clearance-cookie request, then a real browser
//!
//! Only reached when a `cf_clearance` cookie is configured.

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::BrowserTimings;
use crate::deadline::Deadline;
use crate::error::StageError;
use crate::extract::{absolutize, file_url_regex, is_qualifying};
use crate::fetch::{Fetcher, HttpRequest};
use crate::schema::Hit;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

const CHALLENGE_STATUSES: &[u16] = &[403, 429, 503];

const CHALLENGE_MARKERS: &[&str] = &[
    "Just a moment",
    "Checking your browser",
    "cf-chl",
    "cf_chl_opt",
    "challenge-platform",
];

/// Markers that only ever appear on an interstitial, whatever the status.
const HARD_MARKERS: &[&str] = &["cf_chl_opt", "challenge-platform"];

static FILE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    file_url_regex(&["mp4", "mkv", "avi", "zip", "rar", "pdf", "doc", "docx"])
});
static HREF_NEAR_DOWNLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href=["']([^"']+)["'][^\n]*?download"#).unwrap());
static DATA_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)data-url=["']([^"']+)["']"#).unwrap());
static META_REFRESH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[http-equiv][content]").unwrap());
static REFRESH_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)url=(.*)").unwrap());
static JS_REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"window\.location\.href\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Challenge interstitial, judged by status (when known) and markup markers.
pub fn is_challenge_page(status: Option<u16>, body: &str) -> bool {
    if HARD_MARKERS.iter().any(|m| body.contains(m)) {
        return true;
    }
    let marked = CHALLENGE_MARKERS.iter().any(|m| body.contains(m));
    match status {
        Some(code) => marked && CHALLENGE_STATUSES.contains(&code),
        None => marked,
    }
}

/// Link heuristics for a page that got past the challenge.
fn link_heuristics(html: &str, base: &Url) -> Option<String> {
    let from_patterns = [&*FILE_LINK, &*HREF_NEAR_DOWNLOAD, &*DATA_URL]
        .into_iter()
        .find_map(|re| {
            re.captures_iter(html)
                .filter_map(|c| {
                    let m = c.get(1).or_else(|| c.get(0))?;
                    absolutize(base, m.as_str())
                })
                .find(|u| is_qualifying(u))
        });
    if from_patterns.is_some() {
        return from_patterns;
    }

    let doc = Html::parse_document(html);
    let refresh = doc
        .select(&META_REFRESH)
        .find(|m| {
            m.value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
        })
        .and_then(|m| m.value().attr("content"))
        .and_then(|content| REFRESH_URL.captures(&content).map(|c| c[1].trim().to_string()))
        .and_then(|u| absolutize(base, u.trim_matches(|c| c == '\'' || c == '"')))
        .filter(|u| is_qualifying(u));
    if refresh.is_some() {
        return refresh;
    }

    JS_REDIRECT
        .captures_iter(html)
        .filter_map(|c| absolutize(base, &c[1]))
        .find(|u| is_qualifying(u))
}

pub struct ProtectionBypass<'a> {
    pub fetcher: &'a dyn Fetcher,
    /// `None` when browser stages are disabled.
    pub launcher: Option<&'a dyn BrowserLauncher>,
    pub clearance: &'a str,
    pub user_agent: &'a str,
    pub fetch_timeout: Duration,
    pub timings: &'a BrowserTimings,
    pub deadline: Deadline,
}

impl ProtectionBypass<'_> {
    pub async fn run(&self, url: &str) -> Result<Hit, StageError> {
        let light = match self.lightweight(url).await {
            Ok(hit) => return Ok(hit),
            Err(e) => e,
        };
        match self.launcher {
            Some(launcher) => {
                tracing::debug!(url, "clearance request gave nothing: {}", light);
                self.heavyweight(launcher, url).await
            }
            None => Err(light),
        }
    }

    async fn lightweight(&self, url: &str) -> Result<Hit, StageError> {
        let base = Url::parse(url).map_err(|e| StageError::not_found(format!("bad url: {}", e)))?;
        let timeout = self.deadline.bound(self.fetch_timeout)?;
        let response = self
            .fetcher
            .send(
                HttpRequest::get(url)
                    .browser_headers(self.user_agent, url)
                    .header("Upgrade-Insecure-Requests", "1")
                    .cookies(&[("cf_clearance", self.clearance)]),
                timeout,
            )
            .await?;

        if is_challenge_page(Some(response.status), &response.body) {
            return Err(StageError::ChallengeUnsolved(
                "clearance cookie rejected".to_string(),
            ));
        }

        let final_url = Url::parse(&response.url).unwrap_or(base);
        if let Some(link) = link_heuristics(&response.body, &final_url) {
            return Ok(Hit::new(link, "cloudflare"));
        }
        if is_qualifying(final_url.as_str()) {
            return Ok(Hit::new(final_url.as_str(), "cloudflare"));
        }
        Err(StageError::not_found("no link behind clearance"))
    }

    async fn heavyweight(&self, launcher: &dyn BrowserLauncher, url: &str) -> Result<Hit, StageError> {
        let session = self
            .deadline
            .run(self.timings.nav_timeout, launcher.launch())
            .await?;
        let outcome = self
            .deadline
            .run(self.deadline.remaining(), self.drive(session.as_ref(), url))
            .await;
        session.close().await;
        outcome
    }

    async fn drive(&self, session: &dyn BrowserSession, url: &str) -> Result<Hit, StageError> {
        session.goto(url).await?;
        tokio::time::sleep(self.timings.challenge_settle.min(self.deadline.remaining())).await;

        let anchors = session.query("a[class*='download']").await.unwrap_or_default();
        if let Some(href) = anchors
            .iter()
            .filter_map(|a| a.href.as_deref())
            .find(|h| is_qualifying(h))
        {
            return Ok(Hit::new(href, "cloudflare_browser"));
        }

        let html = session.content().await.unwrap_or_default();
        if is_challenge_page(None, &html) {
            return Err(StageError::ChallengeUnsolved(
                "challenge still shown after browser settle".to_string(),
            ));
        }
        match session.current_url().await {
            Some(current) if is_qualifying(&current) => Ok(Hit::new(current, "cloudflare_browser")),
            _ => Err(StageError::not_found("browser passed challenge but found no link")),
        }
    }
}
