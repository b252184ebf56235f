//! Error taxonomy for resolution stages
//!
//! Stage errors never leave the orchestrator. They are logged and folded into
//! "this stage found nothing"; callers only ever see a [`FailureKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single stage (family resolver, probe pass, browser run) gave up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// No secret configured for the family. Triggers fallback, never fatal.
    #[error("no credentials configured for {0}")]
    MissingCredentials(&'static str),

    /// Lock page fetched but the embedded token was not there.
    #[error("token not found: {0}")]
    MissingToken(&'static str),

    /// Bot-protection challenge still in place after both bypass paths.
    #[error("challenge unsolved: {0}")]
    ChallengeUnsolved(String),

    /// Interactive CAPTCHA that needs a human.
    #[error("Site protected by {0} - manual verification required")]
    ManualVerification(&'static str),

    /// Network failure, HTTP timeout, or a breached request deadline.
    #[error("transport error: {0}")]
    Transport(String),

    /// Headless browser could not be launched or driven.
    #[error("browser error: {0}")]
    Browser(String),

    /// The stage ran to completion without a qualifying URL.
    #[error("{0}")]
    NotFound(String),
}

impl StageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StageError::NotFound(what.into())
    }

    pub fn deadline() -> Self {
        StageError::Transport("request deadline exceeded".to_string())
    }

    /// Whether the message is safe and useful to show the end user.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            StageError::ManualVerification(_) | StageError::ChallengeUnsolved(_)
        )
    }
}

impl From<reqwest::Error> for StageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StageError::Transport("request timed out".to_string())
        } else if e.is_connect() {
            StageError::Transport("connection failed".to_string())
        } else {
            StageError::Transport(e.without_url().to_string())
        }
    }
}

/// Terminal failure reported in a [`crate::ResolutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input was not an absolute http(s) URL.
    InvalidUrl,
    /// No family matched and every generic strategy came up empty.
    UnsupportedSite,
    /// Family recognised, but nothing produced a direct link.
    ExhaustedStrategies,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidUrl => "invalid_url",
            FailureKind::UnsupportedSite => "unsupported_site",
            FailureKind::ExhaustedStrategies => "exhausted_strategies",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a cache store. Always downgraded to a miss by the resolver.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache format: {0}")]
    Format(#[from] serde_yaml::Error),
}
