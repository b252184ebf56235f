//! Extraction toolkit: ten probes over one fetched page
//!
//! The page is fetched once. Form submission goes first because it is the
//! only probe that talks to the network; the other nine are pure functions
//! of the parsed document and run in their fixed order until one yields a
//! qualifying link. Hidden content and script patterns are checked before
//! anything is evaluated; only when both miss are the page's trigger scripts
//! evaluated, all in one evaluator session.

mod encoded;
mod forms;
mod markup;
mod script;

pub use script::{BrowserEvaluator, NoEvaluator, ScriptEvaluator, LINK_GLOBALS};

use crate::deadline::Deadline;
use crate::error::StageError;
use crate::extract::is_qualifying;
use crate::fetch::{Fetcher, HttpRequest};
use crate::schema::Hit;
use scraper::Html;
use std::time::Duration;
use url::Url;

/// The ten probes, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    FormSubmission,
    HiddenContent,
    ScriptScan,
    MetaRefresh,
    Embedded,
    Base64Scan,
    UrlParams,
    Buttons,
    DataAttributes,
    FilePatterns,
}

impl Probe {
    pub const ALL: [Probe; 10] = [
        Probe::FormSubmission,
        Probe::HiddenContent,
        Probe::ScriptScan,
        Probe::MetaRefresh,
        Probe::Embedded,
        Probe::Base64Scan,
        Probe::UrlParams,
        Probe::Buttons,
        Probe::DataAttributes,
        Probe::FilePatterns,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Probe::FormSubmission => "form_submission",
            Probe::HiddenContent => "css_hidden",
            Probe::ScriptScan => "script_scan",
            Probe::MetaRefresh => "meta_refresh",
            Probe::Embedded => "embedded",
            Probe::Base64Scan => "base64",
            Probe::UrlParams => "url_params",
            Probe::Buttons => "buttons",
            Probe::DataAttributes => "data_attribute",
            Probe::FilePatterns => "file_pattern",
        }
    }

    /// Run a document-only probe. `FormSubmission` needs the network and
    /// always answers `None` here.
    pub fn try_extract(&self, page: &ParsedPage<'_>) -> Option<Hit> {
        let hit = match self {
            Probe::FormSubmission => None,
            Probe::HiddenContent => markup::hidden_content(page),
            Probe::ScriptScan => script::scan_scripts(page),
            Probe::MetaRefresh => markup::meta_refresh(page),
            Probe::Embedded => markup::embedded(page),
            Probe::Base64Scan => encoded::base64_tokens(page),
            Probe::UrlParams => encoded::url_params(page),
            Probe::Buttons => markup::buttons(page),
            Probe::DataAttributes => markup::data_attributes(page),
            Probe::FilePatterns => encoded::file_patterns(page),
        };
        hit.filter(|h| is_qualifying(&h.url))
    }
}

/// Raw response of the single upfront fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub source_url: Url,
    /// URL after redirects; relative links resolve against it.
    pub final_url: Url,
    pub html: String,
}

/// A fetched page plus its parsed DOM.
pub struct ParsedPage<'a> {
    pub doc: Html,
    pub raw: &'a str,
    pub source_url: &'a Url,
    pub final_url: &'a Url,
    /// String globals read back by a [`ScriptEvaluator`].
    pub evaluated: Vec<String>,
}

impl<'a> ParsedPage<'a> {
    pub fn parse(page: &'a FetchedPage) -> Self {
        Self {
            doc: Html::parse_document(&page.html),
            raw: &page.html,
            source_url: &page.source_url,
            final_url: &page.final_url,
            evaluated: Vec::new(),
        }
    }

    pub fn join(&self, href: &str) -> Option<String> {
        crate::extract::absolutize(self.final_url, href)
    }
}

/// Probe 2 and the pattern part of probe 3: what can be found before
/// spending an evaluator session on the page.
pub fn scan_before_evaluation(page: &FetchedPage) -> Option<Hit> {
    let parsed = ParsedPage::parse(page);
    Probe::HiddenContent
        .try_extract(&parsed)
        .or_else(|| script::scan_script_patterns(&parsed).filter(|h| is_qualifying(&h.url)))
}

/// Probes 2–10 over an already fetched page. Pure; no network.
pub fn scan_static(page: &FetchedPage, evaluated: Vec<String>) -> Option<Hit> {
    let mut parsed = ParsedPage::parse(page);
    parsed.evaluated = evaluated;
    Probe::ALL
        .iter()
        .filter(|p| **p != Probe::FormSubmission)
        .find_map(|probe| {
            let hit = probe.try_extract(&parsed);
            match &hit {
                Some(h) => tracing::debug!(probe = probe.name(), url = %h.url, "probe hit"),
                None => tracing::trace!(probe = probe.name(), "probe found nothing"),
            }
            hit
        })
}

/// The toolkit stage: fetch once, then run all ten probes in order.
pub struct Toolkit<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub evaluator: &'a dyn ScriptEvaluator,
    pub user_agent: &'a str,
    pub fetch_timeout: Duration,
    pub deadline: Deadline,
}

impl Toolkit<'_> {
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, StageError> {
        let source_url =
            Url::parse(url).map_err(|e| StageError::not_found(format!("bad url: {}", e)))?;
        let timeout = self.deadline.bound(self.fetch_timeout)?;
        let response = self
            .fetcher
            .send(
                HttpRequest::get(url).browser_headers(self.user_agent, url),
                timeout,
            )
            .await?;
        let final_url = Url::parse(&response.url).unwrap_or_else(|_| source_url.clone());
        Ok(FetchedPage {
            source_url,
            final_url,
            html: response.body,
        })
    }

    /// One evaluator call per page. Failures only cost the evaluation-backed
    /// part of probe 3.
    async fn evaluate_scripts(&self, page: &FetchedPage) -> Vec<String> {
        let sources = script::evaluable_scripts(&page.html);
        if sources.is_empty() || self.deadline.is_expired() {
            return Vec::new();
        }
        match self
            .evaluator
            .read_globals(&sources, LINK_GLOBALS, self.deadline)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(scripts = sources.len(), "script evaluation unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn run(&self, url: &str) -> Result<Hit, StageError> {
        let page = self.fetch_page(url).await?;

        let plans = forms::plan_forms(&page);
        if let Some(hit) = forms::submit_forms(self, &page, plans).await {
            return Ok(hit);
        }

        if let Some(hit) = scan_before_evaluation(&page) {
            tracing::debug!(url = %hit.url, tag = %hit.tag, "found before script evaluation");
            return Ok(hit);
        }

        let evaluated = self.evaluate_scripts(&page).await;
        scan_static(&page, evaluated)
            .ok_or_else(|| StageError::not_found("no direct link found by any extraction probe"))
    }
}

#[cfg(test)]
pub(crate) fn page_for(url: &str, html: &str) -> FetchedPage {
    let u = Url::parse(url).unwrap();
    FetchedPage {
        source_url: u.clone(),
        final_url: u,
        html: html.to_string(),
    }
}
