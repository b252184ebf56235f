//! Browser automation resolver
//!
//! Drives one isolated Chrome session through six tactics in a fixed order.
//! A tactic either finds a link, finds nothing, or stops the whole run (an
//! interactive CAPTCHA). The session is closed on every exit path, including
//! a breached deadline.

use crate::browser::{BrowserLauncher, BrowserSession, ElementInfo};
use crate::config::BrowserTimings;
use crate::deadline::Deadline;
use crate::error::StageError;
use crate::extract::{file_url_regex, is_qualifying};
use crate::schema::Hit;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

const COUNTDOWN_MARKERS: &[&str] = &["#timer", ".countdown", ".timer"];
const COUNTDOWN_TEXT: &[&str] = &["second", "please wait"];

/// Continue/download controls, with an optional required text.
const CONTINUE_CONTROLS: &[(&str, Option<&str>)] = &[
    ("#continue", None),
    ("#proceed", None),
    ("#download", None),
    (".continue-button", None),
    (".download-button", None),
    ("button", Some("continue")),
    ("a", Some("download")),
];

const SUBMIT_CONTROLS: &str = "form button[type='submit'], form input[type='submit']";

const DYNAMIC_LINKS: &[&str] = &[
    "a[href*='download']",
    "a[href*='file']",
    "a[download]",
    ".download-link",
    "#download-link",
];

const CONTEXT_GLOBALS: &[&str] = &[
    "downloadUrl",
    "download_url",
    "downloadLink",
    "download_link",
    "fileUrl",
    "file_url",
    "directLink",
    "direct_link",
    "url",
    "link",
    "href",
];

/// Iframe source fragment → provider shown to the user.
const CAPTCHA_PROVIDERS: &[(&str, &str)] = &[
    ("recaptcha", "reCAPTCHA"),
    ("hcaptcha", "hCaptcha"),
    ("challenges.cloudflare.com", "Turnstile"),
];

static PAGE_SOURCE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    file_url_regex(&["mp4", "mkv", "avi", "zip", "rar", "pdf", "exe", "apk"])
});

/// The six tactics, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tactic {
    Countdown,
    Captcha,
    DelayedForm,
    DynamicContent,
    PageContext,
    NetworkLog,
}

impl Tactic {
    pub const ALL: [Tactic; 6] = [
        Tactic::Countdown,
        Tactic::Captcha,
        Tactic::DelayedForm,
        Tactic::DynamicContent,
        Tactic::PageContext,
        Tactic::NetworkLog,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tactic::Countdown => "countdown",
            Tactic::Captcha => "captcha",
            Tactic::DelayedForm => "delayed_form",
            Tactic::DynamicContent => "dynamic_content",
            Tactic::PageContext => "page_context",
            Tactic::NetworkLog => "network_log",
        }
    }
}

fn context_script() -> String {
    let names = serde_json::to_string(CONTEXT_GLOBALS).unwrap_or_else(|_| "[]".to_string());
    format!("(() => {names}.map(n => window[n]).filter(v => typeof v === 'string'))()")
}

pub struct BrowserAutomation<'a> {
    pub launcher: &'a dyn BrowserLauncher,
    pub timings: &'a BrowserTimings,
    pub deadline: Deadline,
}

impl BrowserAutomation<'_> {
    pub async fn run(&self, url: &str) -> Result<Hit, StageError> {
        let session = self
            .deadline
            .run(self.timings.nav_timeout, self.launcher.launch())
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
        self.pause(self.timings.settle).await;

        for tactic in Tactic::ALL {
            let found = match tactic {
                Tactic::Countdown => self.countdown(session).await,
                Tactic::Captcha => self.captcha(session).await,
                Tactic::DelayedForm => self.delayed_form(session).await,
                Tactic::DynamicContent => self.dynamic_content(session).await,
                Tactic::PageContext => self.page_context(session).await,
                Tactic::NetworkLog => self.network_log(session).await,
            };
            match found {
                Ok(Some(hit)) => {
                    tracing::debug!(tactic = tactic.name(), url = %hit.url, "browser tactic hit");
                    return Ok(hit);
                }
                Ok(None) => tracing::trace!(tactic = tactic.name(), "browser tactic found nothing"),
                Err(e) if e.is_user_facing() => return Err(e),
                Err(e) => tracing::debug!(tactic = tactic.name(), "browser tactic failed: {}", e),
            }
        }

        match session.current_url().await {
            Some(current) if current != url && is_qualifying(&current) => {
                Ok(Hit::new(current, "browser_automation"))
            }
            _ => Err(StageError::not_found("no browser tactic produced a link")),
        }
    }

    async fn pause(&self, wait: Duration) {
        let wait = wait.min(self.deadline.remaining());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    async fn landed(&self, session: &dyn BrowserSession, tag: &str) -> Option<Hit> {
        self.pause(self.timings.settle).await;
        session
            .current_url()
            .await
            .filter(|u| is_qualifying(u))
            .map(|u| Hit::new(u, tag))
    }

    async fn countdown_present(&self, session: &dyn BrowserSession) -> bool {
        for sel in COUNTDOWN_MARKERS {
            if session
                .query(sel)
                .await
                .unwrap_or_default()
                .iter()
                .any(|e| e.visible)
            {
                return true;
            }
        }
        let html = session.content().await.unwrap_or_default().to_lowercase();
        COUNTDOWN_TEXT.iter().any(|t| html.contains(t))
    }

    /// First visible, enabled control as `(selector, index)`.
    async fn ready_control(&self, session: &dyn BrowserSession) -> Option<(&'static str, usize)> {
        for (sel, text) in CONTINUE_CONTROLS {
            let elements: Vec<ElementInfo> = session.query(sel).await.unwrap_or_default();
            let index = elements.iter().position(|e| {
                e.visible && e.enabled && text.map_or(true, |t| e.text_contains(t))
            });
            if let Some(i) = index {
                return Some((*sel, i));
            }
        }
        None
    }

    /// (a) Wait out a countdown and click the control it unlocks. Only the
    /// first click is attempted.
    async fn countdown(&self, session: &dyn BrowserSession) -> Result<Option<Hit>, StageError> {
        if !self.countdown_present(session).await {
            return Ok(None);
        }
        tracing::info!("countdown detected, waiting for continue control");
        for _ in 0..self.timings.countdown_polls {
            if self.deadline.is_expired() {
                return Err(StageError::deadline());
            }
            self.pause(self.timings.poll_interval).await;
            if let Some((sel, index)) = self.ready_control(session).await {
                session.click(sel, index).await?;
                return Ok(self.landed(session, "countdown_bypass").await);
            }
        }
        Ok(None)
    }

    /// (b) Interactive CAPTCHA: nothing more can be done unattended.
    async fn captcha(&self, session: &dyn BrowserSession) -> Result<Option<Hit>, StageError> {
        let frames = session.query("iframe").await.unwrap_or_default();
        for frame in &frames {
            let src = frame.src.as_deref().unwrap_or("").to_lowercase();
            if let Some((_, provider)) = CAPTCHA_PROVIDERS.iter().find(|(m, _)| src.contains(m)) {
                tracing::info!(provider = *provider, "interactive captcha detected");
                return Err(StageError::ManualVerification(*provider));
            }
        }
        Ok(None)
    }

    /// (c) Wait for a form to show up and press its first submit control.
    async fn delayed_form(&self, session: &dyn BrowserSession) -> Result<Option<Hit>, StageError> {
        let started = tokio::time::Instant::now();
        loop {
            let forms = session.query("form").await.unwrap_or_default();
            if !forms.is_empty() {
                break;
            }
            if started.elapsed() >= self.timings.form_wait || self.deadline.is_expired() {
                return Ok(None);
            }
            self.pause(self.timings.poll_interval).await;
        }

        let submits = session.query(SUBMIT_CONTROLS).await?;
        if submits.is_empty() {
            return Ok(None);
        }
        session.click(SUBMIT_CONTROLS, 0).await?;
        Ok(self.landed(session, "delayed_form").await)
    }

    /// (d) Scroll to trigger lazy content, then scan download-styled links.
    async fn dynamic_content(&self, session: &dyn BrowserSession) -> Result<Option<Hit>, StageError> {
        session
            .evaluate("window.scrollTo(0, document.body ? document.body.scrollHeight : 0)")
            .await?;
        self.pause(self.timings.settle).await;

        for sel in DYNAMIC_LINKS {
            let elements = session.query(sel).await.unwrap_or_default();
            if let Some(href) = elements
                .iter()
                .filter_map(|e| e.href.as_deref())
                .find(|h| is_qualifying(h))
            {
                return Ok(Some(Hit::new(href, "dynamic_content")));
            }
        }
        Ok(None)
    }

    /// (e) Conventional globals, then file URLs in the rendered markup.
    async fn page_context(&self, session: &dyn BrowserSession) -> Result<Option<Hit>, StageError> {
        let values: Vec<String> = session
            .evaluate(&context_script())
            .await
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if let Some(url) = values.into_iter().find(|v| is_qualifying(v)) {
            return Ok(Some(Hit::new(url, "javascript_context")));
        }

        let html = session.content().await?;
        Ok(PAGE_SOURCE_FILE
            .find_iter(&html)
            .map(|m| m.as_str())
            .find(|u| is_qualifying(u))
            .map(|u| Hit::new(u, "page_source_extraction")))
    }

    /// (f) Requests the page made on its own.
    async fn network_log(&self, session: &dyn BrowserSession) -> Result<Option<Hit>, StageError> {
        Ok(session
            .network_log()
            .await
            .into_iter()
            .filter(|u| {
                let lower = u.to_lowercase();
                lower.contains("download") || lower.contains("file")
            })
            .find(|u| is_qualifying(u))
            .map(|u| Hit::new(u, "network_monitoring")))
    }
}
