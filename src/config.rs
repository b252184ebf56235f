//! Engine configuration: credentials, timeouts, browser timings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::classify::{FamilyEntry, SiteTable};

/// Per-family secrets. An empty or missing value means "not configured".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub gdtot_crypt: Option<String>,
    #[serde(default)]
    pub xsrf_token: Option<String>,
    #[serde(default)]
    pub laravel_session: Option<String>,
    #[serde(default)]
    pub uptobox_token: Option<String>,
    #[serde(default)]
    pub terabox_cookie: Option<String>,
    /// `cf_clearance` cookie; its presence enables the protection bypass stage.
    #[serde(default)]
    pub cloudflare_clearance: Option<String>,
}

fn configured(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Credentials {
    pub fn gdtot(&self) -> Option<&str> {
        configured(&self.gdtot_crypt)
    }

    /// Both sharer cookies, or nothing.
    pub fn sharer(&self) -> Option<(&str, &str)> {
        Some((configured(&self.xsrf_token)?, configured(&self.laravel_session)?))
    }

    pub fn uptobox(&self) -> Option<&str> {
        configured(&self.uptobox_token)
    }

    pub fn terabox(&self) -> Option<&str> {
        configured(&self.terabox_cookie)
    }

    pub fn cloudflare(&self) -> Option<&str> {
        configured(&self.cloudflare_clearance)
    }
}

/// Timings for the browser-driven stages. Tests shrink these to zero.
#[derive(Debug, Clone)]
pub struct BrowserTimings {
    /// Navigation timeout per `goto`.
    pub nav_timeout: Duration,
    /// Timeout for a single DOM query / click / script call.
    pub op_timeout: Duration,
    /// Pause after navigation and after each click.
    pub settle: Duration,
    /// Pause the protection layer gives a challenge page to clear itself.
    pub challenge_settle: Duration,
    /// Countdown polling: interval and iteration cap.
    pub poll_interval: Duration,
    pub countdown_polls: u32,
    /// How long to wait for a late form to appear.
    pub form_wait: Duration,
}

impl Default for BrowserTimings {
    fn default() -> Self {
        Self {
            nav_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            challenge_settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            countdown_polls: 60,
            form_wait: Duration::from_secs(30),
        }
    }
}

impl BrowserTimings {
    /// No waiting at all; for tests driving fake sessions.
    pub fn instant() -> Self {
        Self {
            nav_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(5),
            settle: Duration::ZERO,
            challenge_settle: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            countdown_polls: 3,
            form_wait: Duration::ZERO,
        }
    }
}

/// Everything the resolver needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub credentials: Credentials,
    /// Timeout for one HTTP request.
    pub fetch_timeout: Duration,
    /// Overall budget for one `resolve` call.
    pub request_deadline: Duration,
    pub browser: BrowserTimings,
    /// Skip the browser-driven stages entirely.
    pub browser_enabled: bool,
    pub user_agent: String,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            fetch_timeout: Duration::from_secs(15),
            request_deadline: Duration::from_secs(180),
            browser: BrowserTimings::default(),
            browser_enabled: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// On-disk family table: an ordered list so table order survives the round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitesFile {
    pub families: Vec<FamilyEntry>,
}

/// Load a YAML family table, replacing the built-in one.
pub async fn load_site_table(path: &Path) -> Result<SiteTable> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: SitesFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(SiteTable::new(file.families))
}
