//! Resolution orchestrator
//!
//! One `resolve` call walks a fixed chain of stages until the first one
//! produces a qualifying link:
//!
//! 1. credentialed family resolver (only when the family is known and its
//!    secret is configured)
//! 2. extraction toolkit
//! 3. protection bypass (only with a clearance cookie)
//! 4. family-agnostic heuristic pass
//! 5. browser automation
//!
//! Stage errors are logged and folded into "found nothing". The caller only
//! ever sees a [`ResolutionResult`].

use crate::automation::BrowserAutomation;
use crate::browser::BrowserLauncher;
use crate::cache::LinkCache;
use crate::classify::SiteTable;
use crate::config::{Credentials, EngineConfig};
use crate::deadline::Deadline;
use crate::error::{FailureKind, StageError};
use crate::extract::is_qualifying;
use crate::families::{self, Family, FamilyContext};
use crate::fetch::{Fetcher, HttpConnector};
use crate::generic::GenericPass;
use crate::protection::ProtectionBypass;
use crate::schema::{Hit, ResolutionRequest, ResolutionResult};
use crate::toolkit::{NoEvaluator, ScriptEvaluator, Toolkit};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Stage names as they appear in logs.
const FAMILY: &str = "family";
const TOOLKIT: &str = "toolkit";
const PROTECTION: &str = "protection";
const GENERIC: &str = "generic";
const AUTOMATION: &str = "automation";

pub struct Resolver {
    config: EngineConfig,
    sites: SiteTable,
    connector: Arc<dyn HttpConnector>,
    launcher: Arc<dyn BrowserLauncher>,
    evaluator: Arc<dyn ScriptEvaluator>,
    cache: Option<Arc<dyn LinkCache>>,
}

/// What the stages left behind when none of them succeeded.
#[derive(Default)]
struct Attempts {
    /// Messages safe to show the user (CAPTCHA, unsolved challenge).
    reasons: Vec<String>,
    /// A stage demanded that nothing else runs.
    halted: bool,
}

impl Attempts {
    /// Log the stage outcome; keep a qualifying hit, swallow everything else.
    fn settle(&mut self, stage: &str, outcome: Result<Hit, StageError>) -> Option<Hit> {
        match outcome {
            Ok(hit) if is_qualifying(&hit.url) => {
                info!(stage, tag = %hit.tag, url = %hit.url, "stage resolved link");
                Some(hit)
            }
            Ok(hit) => {
                debug!(stage, url = %hit.url, "discarded non-qualifying link");
                None
            }
            Err(StageError::NotFound(msg)) => {
                debug!(stage, "{}", msg);
                None
            }
            Err(e) => {
                warn!(stage, "{}", e);
                if e.is_user_facing() {
                    self.reasons.push(e.to_string());
                }
                if matches!(e, StageError::ManualVerification(_)) {
                    self.halted = true;
                }
                None
            }
        }
    }
}

impl Resolver {
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn HttpConnector>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            sites: SiteTable::default(),
            connector,
            launcher,
            evaluator: Arc::new(NoEvaluator),
            cache: None,
        }
    }

    pub fn with_sites(mut self, sites: SiteTable) -> Self {
        self.sites = sites;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn LinkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Resolve with the engine's configured credentials.
    pub async fn resolve(&self, url: &str) -> ResolutionResult {
        let request = ResolutionRequest::new(url.trim(), self.config.credentials.clone());
        self.resolve_request(&request).await
    }

    pub async fn resolve_request(&self, request: &ResolutionRequest) -> ResolutionResult {
        let url = request.source_url.as_str();
        if !is_resolvable(url) {
            return ResolutionResult::failure(
                url,
                FailureKind::InvalidUrl,
                format!("Invalid URL: {}", url),
            );
        }

        if let Some(cached) = self.cached(url).await {
            return cached;
        }

        let family = request
            .site_family
            .clone()
            .or_else(|| self.sites.classify(url));
        info!(url, family = family.as_deref().unwrap_or("-"), "resolving");

        let deadline = Deadline::after(self.config.request_deadline);
        let session = match self.connector.session() {
            Ok(s) => s,
            Err(e) => {
                warn!("{}", e);
                return self.exhausted(url, family.is_some(), &Attempts::default());
            }
        };

        let mut attempts = Attempts::default();
        let hit = self
            .run_stages(
                url,
                family.as_deref(),
                &request.credentials,
                session.as_ref(),
                deadline,
                &mut attempts,
            )
            .await;

        match hit {
            Some(hit) => {
                self.remember(url, &hit).await;
                ResolutionResult::success(url, hit.url, hit.tag)
            }
            None => self.exhausted(url, family.is_some(), &attempts),
        }
    }

    async fn run_stages(
        &self,
        url: &str,
        family: Option<&str>,
        credentials: &Credentials,
        fetcher: &dyn Fetcher,
        deadline: Deadline,
        attempts: &mut Attempts,
    ) -> Option<Hit> {
        let user_agent = self.config.user_agent.as_str();
        let fetch_timeout = self.config.fetch_timeout;

        if let Some(family) = family.and_then(Family::from_name) {
            if family.has_credentials(credentials) {
                info!(stage = FAMILY, family = family.name(), "stage start");
                let ctx = FamilyContext {
                    fetcher,
                    credentials,
                    user_agent,
                    fetch_timeout,
                    deadline,
                };
                let outcome = families::resolve(family, url, &ctx).await;
                if let Some(hit) = attempts.settle(FAMILY, outcome) {
                    return Some(hit);
                }
            } else {
                debug!(family = family.name(), "no credentials, skipping family resolver");
            }
        }

        info!(stage = TOOLKIT, "stage start");
        let toolkit = Toolkit {
            fetcher,
            evaluator: self.evaluator.as_ref(),
            user_agent,
            fetch_timeout,
            deadline,
        };
        if let Some(hit) = attempts.settle(TOOLKIT, toolkit.run(url).await) {
            return Some(hit);
        }

        if let Some(clearance) = credentials.cloudflare() {
            info!(stage = PROTECTION, "stage start");
            let bypass = ProtectionBypass {
                fetcher,
                launcher: self
                    .config
                    .browser_enabled
                    .then_some(self.launcher.as_ref()),
                clearance,
                user_agent,
                fetch_timeout,
                timings: &self.config.browser,
                deadline,
            };
            if let Some(hit) = attempts.settle(PROTECTION, bypass.run(url).await) {
                return Some(hit);
            }
            if attempts.halted {
                return None;
            }
        }

        info!(stage = GENERIC, "stage start");
        let generic = GenericPass {
            fetcher,
            user_agent,
            fetch_timeout,
            deadline,
        };
        if let Some(hit) = attempts.settle(GENERIC, generic.run(url).await) {
            return Some(hit);
        }

        if !self.config.browser_enabled {
            return None;
        }
        info!(stage = AUTOMATION, "stage start");
        let automation = BrowserAutomation {
            launcher: self.launcher.as_ref(),
            timings: &self.config.browser,
            deadline,
        };
        attempts.settle(AUTOMATION, automation.run(url).await)
    }

    async fn cached(&self, url: &str) -> Option<ResolutionResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(url).await {
            Ok(Some(link)) => {
                info!(url, tag = %link.strategy_tag, hits = link.hit_count, "cache hit");
                Some(ResolutionResult::from_cache(&link))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn remember(&self, url: &str, hit: &Hit) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(url, &hit.url, &hit.tag).await {
                warn!("cache write skipped: {}", e);
            }
        }
    }

    fn exhausted(&self, url: &str, classified: bool, attempts: &Attempts) -> ResolutionResult {
        let kind = if classified {
            FailureKind::ExhaustedStrategies
        } else {
            FailureKind::UnsupportedSite
        };
        let mut reason = format!("Could not resolve {}: all bypass methods failed", url);
        if !attempts.reasons.is_empty() {
            reason.push_str(" (");
            reason.push_str(&attempts.reasons.join("; "));
            reason.push(')');
        }
        info!(url, failure = %kind, "resolution failed");
        ResolutionResult::failure(url, kind, reason)
    }
}

/// Absolute http(s) URL with a host.
fn is_resolvable(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
