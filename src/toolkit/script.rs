//! Probe 3: inline script scan, with optional sandboxed evaluation

use super::ParsedPage;
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::deadline::Deadline;
use crate::error::StageError;
use crate::extract::is_qualifying;
use crate::schema::Hit;
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Globals conventionally holding the final link.
pub const LINK_GLOBALS: &[&str] = &["downloadLink", "download_url", "fileUrl", "directLink", "url"];

/// Only scripts mentioning one of these are worth evaluating.
const EVAL_TRIGGERS: &[&str] = &["downloadLink", "download_url"];

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

static NAVIGATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)window\.location\.href\s*=\s*["']([^"']+)["']"#,
        r#"(?i)window\.location\s*=\s*["']([^"']+)["']"#,
        r#"(?i)document\.location\.href\s*=\s*["']([^"']+)["']"#,
        r#"(?i)location\.replace\(\s*["']([^"']+)["']\s*\)"#,
        r#"(?i)location\.href\s*=\s*["']([^"']+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static LITERAL_BINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b(?:var|let|const)\s+\w+\s*=\s*["']([^"']+)["']"#).unwrap());

static ATOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"atob\(\s*["']([^"']+)["']\s*\)"#).unwrap());

/// Runs page scripts in isolation and reads back string-valued globals.
///
/// All `sources` of one page share a single global scope, evaluated in order.
/// Implementations must give up once `deadline` passes.
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn read_globals(
        &self,
        sources: &[String],
        names: &[&str],
        deadline: Deadline,
    ) -> Result<Vec<String>, StageError>;
}

/// Evaluation unavailable: the probe falls back to pattern matching only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvaluator;

#[async_trait]
impl ScriptEvaluator for NoEvaluator {
    async fn read_globals(
        &self,
        _sources: &[String],
        _names: &[&str],
        _deadline: Deadline,
    ) -> Result<Vec<String>, StageError> {
        Ok(Vec::new())
    }
}

/// Evaluates inside a throwaway `about:blank` page.
pub struct BrowserEvaluator {
    launcher: Arc<dyn BrowserLauncher>,
    /// Whole-evaluation limit, launch included. Never outlives the request
    /// deadline; the session is closed even when it elapses.
    budget: Duration,
}

impl BrowserEvaluator {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, budget: Duration) -> Self {
        Self { launcher, budget }
    }

    async fn evaluate_in(
        session: &dyn BrowserSession,
        sources: &[String],
        names: &[&str],
    ) -> Result<Vec<String>, StageError> {
        session.goto("about:blank").await?;
        // Top-level declarations must land in the global scope, so each
        // source is evaluated unwrapped. Script errors are expected.
        for source in sources {
            if let Err(e) = session.evaluate(source).await {
                tracing::debug!("page script raised: {}", e);
            }
        }
        let value = session.evaluate(&reader_script(names)).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

fn reader_script(names: &[&str]) -> String {
    let names = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {names}.map(n => {{
    try {{ const v = (0, eval)(n); return typeof v === 'string' ? v : null; }}
    catch (e) {{ return null; }}
}}).filter(v => v !== null))()"#
    )
}

#[async_trait]
impl ScriptEvaluator for BrowserEvaluator {
    async fn read_globals(
        &self,
        sources: &[String],
        names: &[&str],
        deadline: Deadline,
    ) -> Result<Vec<String>, StageError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let window = deadline.narrow(self.budget)?;
        let session = window.run(window.remaining(), self.launcher.launch()).await?;
        let outcome = window
            .run(
                window.remaining(),
                Self::evaluate_in(session.as_ref(), sources, names),
            )
            .await;
        session.close().await;
        outcome
    }
}

/// Inline script bodies in document order.
pub(crate) fn inline_scripts(doc: &Html) -> Vec<String> {
    doc.select(&SCRIPT)
        .map(|s| s.text().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// Scripts worth handing to a [`ScriptEvaluator`].
pub fn evaluable_scripts(html: &str) -> Vec<String> {
    inline_scripts(&Html::parse_document(html))
        .into_iter()
        .filter(|s| EVAL_TRIGGERS.iter().any(|t| s.contains(t)))
        .collect()
}

fn decode_base64(encoded: &str) -> Option<String> {
    let engine = &base64::engine::general_purpose::STANDARD;
    let bytes = engine
        .decode(encoded)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(encoded.trim_end_matches('=')))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn base64_text(encoded: &str) -> Option<String> {
    decode_base64(encoded).map(|s| s.trim().to_string())
}

fn first_in(page: &ParsedPage<'_>, script: &str, patterns: &[&Regex]) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures_iter(script)
            .filter_map(|c| page.join(&c[1]))
            .find(|u| is_qualifying(u))
    })
}

fn pattern_hit(page: &ParsedPage<'_>, scripts: &[String]) -> Option<Hit> {
    let patterns: Vec<&Regex> = NAVIGATION.iter().chain(std::iter::once(&*LITERAL_BINDING)).collect();
    scripts
        .iter()
        .find_map(|s| first_in(page, s, &patterns))
        .map(|url| Hit::new(url, "javascript"))
}

/// The pattern-only part of probe 3: navigation assignments and literal
/// bindings. Needs no evaluation.
pub(crate) fn scan_script_patterns(page: &ParsedPage<'_>) -> Option<Hit> {
    pattern_hit(page, &inline_scripts(&page.doc))
}

/// Probe 3. Navigation assignments and literal bindings first, then values
/// produced by evaluation, then `atob("…")` literals.
pub fn scan_scripts(page: &ParsedPage<'_>) -> Option<Hit> {
    let scripts = inline_scripts(&page.doc);
    if let Some(hit) = pattern_hit(page, &scripts) {
        return Some(hit);
    }

    if let Some(url) = page
        .evaluated
        .iter()
        .filter_map(|v| page.join(v))
        .find(|u| is_qualifying(u))
    {
        return Some(Hit::new(url, "javascript_execution"));
    }

    scripts
        .iter()
        .flat_map(|s| ATOB.captures_iter(s))
        .filter_map(|c| base64_text(&c[1]))
        .filter_map(|decoded| page.join(&decoded))
        .find(|u| is_qualifying(u))
        .map(|url| Hit::new(url, "javascript_base64"))
}
