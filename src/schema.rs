//! Request, result and cache records
//!
//! Compact JSON shapes, same conventions as the rest of the tool output.

use crate::config::Credentials;
use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resolution call. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub source_url: String,
    /// Family already known by the caller; `None` means "classify it".
    pub site_family: Option<String>,
    pub credentials: Credentials,
}

impl ResolutionRequest {
    pub fn new(source_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            source_url: source_url.into(),
            site_family: None,
            credentials,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.site_family = Some(family.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Final answer for one source URL. Built only through the two constructors
/// so a success always has a link and a failure always has a reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub url: String,
    pub success: bool,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,
    pub strategy_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

impl ResolutionResult {
    pub fn success(url: &str, direct_url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            success: true,
            outcome: Outcome::Success,
            direct_url: Some(direct_url.into()),
            strategy_tag: tag.into(),
            error: None,
            failure: None,
            cached: false,
        }
    }

    pub fn failure(url: &str, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            outcome: Outcome::Failure,
            direct_url: None,
            strategy_tag: kind.as_str().to_string(),
            error: Some(reason.into()),
            failure: Some(kind),
            cached: false,
        }
    }

    pub fn from_cache(link: &CachedLink) -> Self {
        let mut r = Self::success(&link.source_url, &link.direct_url, &link.strategy_tag);
        r.cached = true;
        r
    }
}

/// A direct link recovered by one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub url: String,
    pub tag: String,
}

impl Hit {
    pub fn new(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tag: tag.into(),
        }
    }
}

/// Cache record keyed by `source_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLink {
    pub source_url: String,
    pub direct_url: String,
    pub strategy_tag: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub hit_count: u64,
}

impl CachedLink {
    pub fn new(source_url: &str, direct_url: &str, strategy_tag: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            direct_url: direct_url.to_string(),
            strategy_tag: strategy_tag.to_string(),
            created_at: Utc::now(),
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_serialization_is_compact() {
        let r = ResolutionResult::success(
            "https://short.example/x",
            "https://cdn.example.com/a.zip",
            "meta_refresh",
        );
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains(r#""success":true"#));
        assert!(json.contains(r#""outcome":"success""#));
        assert!(json.contains(r#""strategy_tag":"meta_refresh""#));
        assert!(!json.contains("error"));
        assert!(!json.contains("cached"));
    }

    #[test]
    fn test_failure_has_reason_and_no_link() {
        let r = ResolutionResult::failure(
            "https://x.example",
            FailureKind::UnsupportedSite,
            "Could not resolve https://x.example",
        );
        assert!(!r.success);
        assert_eq!(r.outcome, Outcome::Failure);
        assert!(r.direct_url.is_none());
        assert_eq!(r.strategy_tag, "unsupported_site");
        assert!(r.error.unwrap().contains("https://x.example"));
    }

    #[test]
    fn test_cached_link_expiry() {
        let mut link = CachedLink::new("a", "b", "c");
        let now = Utc::now();
        link.created_at = now - chrono::Duration::days(31);
        assert!(link.is_expired(chrono::Duration::days(30), now));
        link.created_at = now - chrono::Duration::days(29);
        assert!(!link.is_expired(chrono::Duration::days(30), now));
    }

    #[test]
    fn test_from_cache_marks_cached() {
        let link = CachedLink::new("https://s.example", "https://d.example/f.zip", "base64");
        let r = ResolutionResult::from_cache(&link);
        assert!(r.cached);
        assert_eq!(r.strategy_tag, "base64");
        assert_eq!(r.direct_url.as_deref(), Some("https://d.example/f.zip"));
    }
}
