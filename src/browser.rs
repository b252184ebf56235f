//! Headless Chrome sessions via chromiumoxide
//!
//! Each resolution that needs a browser launches its own Chrome with a
//! throwaway profile directory and tears it down on `close`.

use crate::config::BrowserTimings;
use crate::error::StageError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Hides the usual automation tells before any page script runs.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
    if (!window.chrome) { window.chrome = {}; }
    if (!window.chrome.runtime) {
        window.chrome.runtime = { connect: function() {}, sendMessage: function() {} };
    }
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5], configurable: true });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
})();
"#;

/// Snapshot of a DOM element, as returned by [`BrowserSession::query`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub enabled: bool,
}

impl ElementInfo {
    pub fn text_contains(&self, needle: &str) -> bool {
        self.text.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// What the browser-driven stages need from a live page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), StageError>;
    async fn current_url(&self) -> Option<String>;
    async fn content(&self) -> Result<String, StageError>;
    /// Elements matching a CSS selector, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<ElementInfo>, StageError>;
    /// Click the `index`-th match of `selector`.
    async fn click(&self, selector: &str, index: usize) -> Result<(), StageError>;
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, StageError>;
    /// URLs of every request the page issued so far.
    async fn network_log(&self) -> Vec<String>;
    /// Release the browser. Must be called on every exit path.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, StageError>;
}

/// Launches a fresh headless Chrome per call.
pub struct ChromeLauncher {
    timings: BrowserTimings,
    user_agent: String,
}

impl ChromeLauncher {
    pub fn new(timings: BrowserTimings, user_agent: impl Into<String>) -> Self {
        Self {
            timings,
            user_agent: user_agent.into(),
        }
    }
}

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn profile_dir() -> PathBuf {
    let n = PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("dlink-chrome-{}-{}", std::process::id(), n))
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, StageError> {
        let profile = profile_dir();
        let config = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(&profile)
            .launch_timeout(self.timings.nav_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-setuid-sandbox")
            .arg("--no-first-run")
            .arg("--headless=new")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--window-size=1920,1080")
            .build()
            .map_err(|e| StageError::Browser(format!("config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            StageError::Browser(format!("Failed to launch Chrome ({}). Is Chrome/Chromium installed?", e))
        })?;

        // Spawn handler in background
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let mut session = ChromeSession {
            browser,
            page: None,
            handler_task,
            listener_task: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            profile,
            timings: self.timings.clone(),
        };

        // Already-spawned processes must not leak if page setup fails.
        match session.prepare_page(&self.user_agent).await {
            Ok(()) => Ok(Box::new(session)),
            Err(e) => {
                Box::new(session).close().await;
                Err(e)
            }
        }
    }
}

pub struct ChromeSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    listener_task: Option<JoinHandle<()>>,
    requests: Arc<Mutex<Vec<String>>>,
    profile: PathBuf,
    timings: BrowserTimings,
}

fn browser_err(e: impl std::fmt::Display) -> StageError {
    StageError::Browser(e.to_string())
}

impl ChromeSession {
    async fn prepare_page(&mut self, user_agent: &str) -> Result<(), StageError> {
        let page = self.browser.new_page("about:blank").await.map_err(browser_err)?;

        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(browser_err)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(browser_err)?;

        let mut events = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(browser_err)?;
        let sink = Arc::clone(&self.requests);
        self.listener_task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                sink.lock().await.push(event.request.url.clone());
            }
        }));

        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page, StageError> {
        self.page
            .as_ref()
            .ok_or_else(|| StageError::Browser("page not initialised".to_string()))
    }

    async fn bounded<T, F>(&self, limit: Duration, fut: F) -> Result<T, StageError>
    where
        F: std::future::Future<Output = Result<T, StageError>>,
    {
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StageError::Transport("browser operation timed out".to_string()))?
    }
}

/// Serialises every match of a selector into [`ElementInfo`] records.
fn query_script(selector: &str) -> String {
    let sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => Array.from(document.querySelectorAll({sel})).slice(0, 100).map(e => {{
    const r = e.getBoundingClientRect();
    const s = window.getComputedStyle(e);
    return {{
        tag: e.tagName.toLowerCase(),
        id: e.id || null,
        class: (typeof e.className === 'string' && e.className) ? e.className : null,
        href: e.href || e.getAttribute('href'),
        src: e.src || e.getAttribute('src'),
        text: (e.innerText || e.textContent || '').trim().slice(0, 200),
        visible: s.display !== 'none' && s.visibility !== 'hidden' && (r.width > 0 || r.height > 0),
        enabled: !e.disabled,
    }};
}}))()"#
    )
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&self, url: &str) -> Result<(), StageError> {
        let page = self.page()?;
        self.bounded(self.timings.nav_timeout, async {
            page.goto(url).await.map(|_| ()).map_err(|e| {
                StageError::Transport(format!("navigation failed: {}", parse_error(&e.to_string())))
            })
        })
        .await
    }

    async fn current_url(&self) -> Option<String> {
        let page = self.page.as_ref()?;
        tokio::time::timeout(self.timings.op_timeout, page.url())
            .await
            .ok()?
            .ok()
            .flatten()
    }

    async fn content(&self) -> Result<String, StageError> {
        let page = self.page()?;
        self.bounded(self.timings.op_timeout, async {
            page.content().await.map_err(browser_err)
        })
        .await
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementInfo>, StageError> {
        let value = self.evaluate(&query_script(selector)).await?;
        serde_json::from_value(value).map_err(browser_err)
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), StageError> {
        let page = self.page()?;
        self.bounded(self.timings.op_timeout, async {
            let elements = page.find_elements(selector).await.map_err(browser_err)?;
            let element = elements
                .get(index)
                .ok_or_else(|| StageError::not_found(format!("no element {} for {}", index, selector)))?;
            element.click().await.map_err(browser_err)?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, StageError> {
        let page = self.page()?;
        self.bounded(self.timings.op_timeout, async {
            let result = page.evaluate(script).await.map_err(browser_err)?;
            Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    async fn network_log(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    async fn close(self: Box<Self>) {
        let mut this = self;
        if let Some(task) = this.listener_task.take() {
            task.abort();
        }
        if let Err(e) = this.browser.close().await {
            tracing::debug!("browser close: {}", e);
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), this.browser.wait()).await;
        this.handler_task.abort();
        if let Err(e) = tokio::fs::remove_dir_all(&this.profile).await {
            tracing::debug!("profile cleanup {}: {}", this.profile.display(), e);
        }
    }
}

fn parse_error(error: &str) -> &'static str {
    if error.contains("ERR_NAME_NOT_RESOLVED") {
        "DNS_FAILED"
    } else if error.contains("ERR_CONNECTION_REFUSED") {
        "CONNECTION_REFUSED"
    } else if error.contains("ERR_CONNECTION_TIMED_OUT") {
        "TIMEOUT"
    } else if error.contains("ERR_CERT") || error.contains("SSL") {
        "SSL_ERROR"
    } else {
        "NETWORK_ERROR"
    }
}

/// Scripted browser for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// What the fake page shows. Selectors are matched by exact string.
    #[derive(Debug, Clone, Default)]
    pub struct FakePage {
        pub html: String,
        /// URL reported after navigation; defaults to the requested URL.
        pub landing_url: Option<String>,
        pub elements: HashMap<String, Vec<ElementInfo>>,
        /// Selector → URL the page moves to when it is clicked.
        pub click_targets: HashMap<String, String>,
        /// Value returned by every `evaluate`.
        pub eval_value: serde_json::Value,
        pub network: Vec<String>,
    }

    impl FakePage {
        pub fn with(mut self, selector: &str, elements: Vec<ElementInfo>) -> Self {
            self.elements.insert(selector.to_string(), elements);
            self
        }
    }

    #[derive(Debug, Default)]
    pub struct Journal {
        pub launches: usize,
        pub closes: usize,
        pub queries: Vec<String>,
        pub clicks: Vec<(String, usize)>,
        pub scripts: Vec<String>,
    }

    pub fn visible(tag: &str, text: &str, href: Option<&str>) -> ElementInfo {
        ElementInfo {
            tag: tag.to_string(),
            text: text.to_string(),
            href: href.map(str::to_string),
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    pub struct FakeLauncher {
        pub page: FakePage,
        pub journal: Arc<StdMutex<Journal>>,
        pub fail: bool,
        /// Time Chrome takes to come up.
        pub launch_delay: Duration,
    }

    impl FakeLauncher {
        pub fn new(page: FakePage) -> Self {
            Self {
                page,
                journal: Arc::new(StdMutex::new(Journal::default())),
                fail: false,
                launch_delay: Duration::ZERO,
            }
        }

        pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
            self.journal.lock().unwrap()
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, StageError> {
            if self.fail {
                return Err(StageError::Browser("no chrome".to_string()));
            }
            self.journal.lock().unwrap().launches += 1;
            if !self.launch_delay.is_zero() {
                tokio::time::sleep(self.launch_delay).await;
            }
            Ok(Box::new(FakeSession {
                page: self.page.clone(),
                current: StdMutex::new(None),
                journal: Arc::clone(&self.journal),
            }))
        }
    }

    pub struct FakeSession {
        page: FakePage,
        current: StdMutex<Option<String>>,
        journal: Arc<StdMutex<Journal>>,
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn goto(&self, url: &str) -> Result<(), StageError> {
            let landed = self.page.landing_url.clone().unwrap_or_else(|| url.to_string());
            *self.current.lock().unwrap() = Some(landed);
            Ok(())
        }

        async fn current_url(&self) -> Option<String> {
            self.current.lock().unwrap().clone()
        }

        async fn content(&self) -> Result<String, StageError> {
            Ok(self.page.html.clone())
        }

        async fn query(&self, selector: &str) -> Result<Vec<ElementInfo>, StageError> {
            self.journal.lock().unwrap().queries.push(selector.to_string());
            Ok(self.page.elements.get(selector).cloned().unwrap_or_default())
        }

        async fn click(&self, selector: &str, index: usize) -> Result<(), StageError> {
            self.journal
                .lock()
                .unwrap()
                .clicks
                .push((selector.to_string(), index));
            if let Some(target) = self.page.click_targets.get(selector) {
                *self.current.lock().unwrap() = Some(target.clone());
            }
            Ok(())
        }

        async fn evaluate(&self, script: &str) -> Result<serde_json::Value, StageError> {
            self.journal.lock().unwrap().scripts.push(script.to_string());
            Ok(self.page.eval_value.clone())
        }

        async fn network_log(&self) -> Vec<String> {
            self.page.network.clone()
        }

        async fn close(self: Box<Self>) {
            self.journal.lock().unwrap().closes += 1;
        }
    }
}
