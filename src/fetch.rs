//! HTTP fetch capability
//!
//! A [`Fetcher`] is one request-scoped session: cookies set by a response are
//! sent on the next request, and nothing outlives the resolution that opened
//! it. [`HttpConnector`] hands out fresh sessions.

use crate::error::StageError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

/// Browser-like defaults sent with page fetches.
pub const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Bodies are read up to this many bytes; the rest is dropped.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Content-type fragments marking a body worth reading.
const TEXTUAL_HINTS: &[&str] = &["html", "xml", "javascript", "json"];

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Sent as `application/x-www-form-urlencoded` body.
    pub form: Vec<(String, String)>,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
            follow_redirects: true,
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            form,
            follow_redirects: true,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Join `name=value` pairs into a single `Cookie` header.
    pub fn cookies(self, pairs: &[(&str, &str)]) -> Self {
        let value = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        self.header("Cookie", value)
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    /// Standard page-fetch headers with the given user agent and referer.
    pub fn browser_headers(self, user_agent: &str, referer: &str) -> Self {
        self.header("User-Agent", user_agent)
            .header("Accept", ACCEPT_HTML)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .header("Referer", referer)
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after redirects.
    pub url: String,
    /// `Location` header when redirects were not followed.
    pub location: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn send(&self, request: HttpRequest, timeout: Duration)
        -> Result<HttpResponse, StageError>;
}

pub trait HttpConnector: Send + Sync {
    /// Open a new session with its own cookie jar.
    fn session(&self) -> Result<Box<dyn Fetcher>, StageError>;
}

/// Production connector backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestConnector;

impl HttpConnector for ReqwestConnector {
    fn session(&self) -> Result<Box<dyn Fetcher>, StageError> {
        Ok(Box::new(ReqwestSession::new()?))
    }
}

/// Missing content types are read; servers gating links rarely omit it on
/// binaries.
fn is_textual(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("text/") || TEXTUAL_HINTS.iter().any(|h| ct.contains(h))
        }
    }
}

async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<String, StageError> {
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - bytes.len();
        if chunk.len() >= room {
            bytes.extend_from_slice(&chunk[..room]);
            tracing::debug!(limit, "response body truncated");
            break;
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Two clients sharing one cookie jar: reqwest fixes the redirect policy per client.
pub struct ReqwestSession {
    follow: reqwest::Client,
    manual: reqwest::Client,
}

impl ReqwestSession {
    pub fn new() -> Result<Self, StageError> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let build = |policy: Policy| {
            reqwest::Client::builder()
                .cookie_provider(Arc::clone(&jar))
                .redirect(policy)
                .build()
                .map_err(|e| StageError::Transport(format!("client setup: {}", e)))
        };
        Ok(Self {
            follow: build(Policy::limited(10))?,
            manual: build(Policy::none())?,
        })
    }
}

fn header_map(pairs: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(k.as_bytes()),
            HeaderValue::from_str(v),
        ) {
            map.append(name, value);
        }
    }
    map
}

#[async_trait]
impl Fetcher for ReqwestSession {
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, StageError> {
        let client = if request.follow_redirects {
            &self.follow
        } else {
            &self.manual
        };

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(header_map(&request.headers))
            .timeout(timeout);
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if is_textual(content_type.as_deref()) {
            read_capped(response, MAX_BODY_BYTES).await?
        } else {
            tracing::debug!(url = %url, content_type = ?content_type, "skipping non-text body");
            String::new()
        };

        Ok(HttpResponse {
            status,
            url,
            location,
            body,
        })
    }
}

pub fn element_text(el: &scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max.saturating_sub(3);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
