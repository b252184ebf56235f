//! Credentialed resolvers for known file-host families
//!
//! Every family follows the same shape: fetch the lock page with the stored
//! session cookie, pull one or two tokens out of the markup, make a single
//! follow-up request and read the direct URL from its redirect or body.
//! Follow-up endpoints hang off the origin of the input URL.

use crate::config::Credentials;
use crate::deadline::Deadline;
use crate::error::StageError;
use crate::extract::absolutize;
use crate::fetch::{Fetcher, HttpRequest, HttpResponse};
use crate::schema::Hit;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

static GDTOT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="token" value="(.*?)""#).unwrap());
static DRIVE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://drive\.google\.com/file/d/([a-zA-Z0-9_-]+)").unwrap());
static SHARER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"_token:\s*"([^"]+)""#).unwrap());
static SHARER_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\bid:\s*"([^"]+)""#).unwrap());
static TERABOX_DLINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""dlink":"([^"]+)""#).unwrap());

/// Families with a dedicated credentialed resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Gdtot,
    Sharerw,
    Uptobox,
    Terabox,
}

impl Family {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gdtot" => Some(Family::Gdtot),
            "sharerw" => Some(Family::Sharerw),
            "uptobox" => Some(Family::Uptobox),
            "terabox" => Some(Family::Terabox),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Family::Gdtot => "gdtot",
            Family::Sharerw => "sharerw",
            Family::Uptobox => "uptobox",
            Family::Terabox => "terabox",
        }
    }

    pub fn has_credentials(&self, creds: &Credentials) -> bool {
        match self {
            Family::Gdtot => creds.gdtot().is_some(),
            Family::Sharerw => creds.sharer().is_some(),
            Family::Uptobox => creds.uptobox().is_some(),
            Family::Terabox => creds.terabox().is_some(),
        }
    }
}

/// Everything a family resolver needs for one attempt.
pub struct FamilyContext<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub credentials: &'a Credentials,
    pub user_agent: &'a str,
    pub fetch_timeout: Duration,
    pub deadline: Deadline,
}

impl FamilyContext<'_> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StageError> {
        let timeout = self.deadline.bound(self.fetch_timeout)?;
        self.fetcher.send(request, timeout).await
    }
}

/// Single attempt, no retries. Missing credentials fail before any request.
pub async fn resolve(family: Family, url: &str, ctx: &FamilyContext<'_>) -> Result<Hit, StageError> {
    match family {
        Family::Gdtot => gdtot(url, ctx).await,
        Family::Sharerw => sharerw(url, ctx).await,
        Family::Uptobox => uptobox(url, ctx).await,
        Family::Terabox => terabox(url, ctx).await,
    }
}

fn origin_of(url: &str) -> Result<(Url, String), StageError> {
    let parsed =
        Url::parse(url).map_err(|e| StageError::not_found(format!("bad url: {}", e)))?;
    let origin = parsed.origin().ascii_serialization();
    Ok((parsed, origin))
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[1].to_string())
}

async fn gdtot(url: &str, ctx: &FamilyContext<'_>) -> Result<Hit, StageError> {
    let crypt = ctx
        .credentials
        .gdtot()
        .ok_or(StageError::MissingCredentials("gdtot"))?;
    let (base, origin) = origin_of(url)?;

    let page = ctx
        .send(
            HttpRequest::get(url)
                .header("User-Agent", ctx.user_agent)
                .cookies(&[("crypt", crypt)]),
        )
        .await?;
    let token = first_capture(&GDTOT_TOKEN, &page.body).ok_or(StageError::MissingToken("gdtot token"))?;

    let response = ctx
        .send(
            HttpRequest::post(format!("{}/file", origin), vec![("token".to_string(), token)])
                .no_redirects()
                .header("User-Agent", ctx.user_agent)
                .header("Accept", crate::fetch::ACCEPT_HTML)
                .header("Origin", origin.clone())
                .header("Referer", url)
                .cookies(&[("crypt", crypt)]),
        )
        .await?;

    if let Some(location) = response.location.as_deref().and_then(|l| absolutize(&base, l)) {
        return Ok(Hit::new(location, "gdtot"));
    }
    first_capture(&DRIVE_FILE, &response.body)
        .map(|id| {
            Hit::new(
                format!("https://drive.google.com/uc?id={}&export=download", id),
                "gdtot",
            )
        })
        .ok_or_else(|| StageError::not_found("gdtot: no redirect or drive link in response"))
}

#[derive(Deserialize)]
struct SharerReply {
    status: Option<String>,
    url: Option<String>,
}

async fn sharerw(url: &str, ctx: &FamilyContext<'_>) -> Result<Hit, StageError> {
    let (xsrf, session) = ctx
        .credentials
        .sharer()
        .ok_or(StageError::MissingCredentials("sharerw"))?;
    let (_, origin) = origin_of(url)?;
    let cookies = [("XSRF-TOKEN", xsrf), ("laravel_session", session)];

    let page = ctx
        .send(
            HttpRequest::get(url)
                .header("User-Agent", ctx.user_agent)
                .header("Referer", url)
                .cookies(&cookies),
        )
        .await?;
    let token = first_capture(&SHARER_TOKEN, &page.body).ok_or(StageError::MissingToken("sharerw _token"))?;
    let id = first_capture(&SHARER_ID, &page.body).ok_or(StageError::MissingToken("sharerw link id"))?;

    let response = ctx
        .send(
            HttpRequest::post(
                format!("{}/api/link/generate", origin),
                vec![("_token".to_string(), token), ("id".to_string(), id)],
            )
            .header("User-Agent", ctx.user_agent)
            .header("Referer", url)
            .header("Accept", "application/json")
            .cookies(&cookies),
        )
        .await?;

    let reply: SharerReply = serde_json::from_str(&response.body)
        .map_err(|_| StageError::not_found("sharerw: unexpected api response"))?;
    match (reply.status.as_deref(), reply.url) {
        (Some("success"), Some(direct)) => Ok(Hit::new(direct, "sharerw")),
        _ => Err(StageError::not_found("sharerw: link generation refused")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UptoboxReply {
    status_code: i64,
    #[serde(default)]
    data: Option<UptoboxData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UptoboxData {
    dl_link: Option<String>,
}

async fn uptobox(url: &str, ctx: &FamilyContext<'_>) -> Result<Hit, StageError> {
    let token = ctx
        .credentials
        .uptobox()
        .ok_or(StageError::MissingCredentials("uptobox"))?;
    let (parsed, origin) = origin_of(url)?;
    let file_code = parsed
        .path_segments()
        .and_then(|mut s| s.next())
        .filter(|s| !s.is_empty())
        .ok_or(StageError::MissingToken("uptobox file code"))?
        .to_string();

    let mut api = Url::parse(&format!("{}/api/link", origin))
        .map_err(|e| StageError::not_found(format!("bad api url: {}", e)))?;
    api.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("file_code", &file_code);

    let response = ctx
        .send(HttpRequest::get(api.as_str()).header("User-Agent", ctx.user_agent))
        .await?;
    let reply: UptoboxReply = serde_json::from_str(&response.body)
        .map_err(|_| StageError::not_found("uptobox: unexpected api response"))?;
    if reply.status_code != 0 {
        return Err(StageError::not_found(format!(
            "uptobox: api status {}",
            reply.status_code
        )));
    }
    reply
        .data
        .and_then(|d| d.dl_link)
        .map(|link| Hit::new(link, "uptobox"))
        .ok_or_else(|| StageError::not_found("uptobox: no dlLink in response"))
}

async fn terabox(url: &str, ctx: &FamilyContext<'_>) -> Result<Hit, StageError> {
    let ndus = ctx
        .credentials
        .terabox()
        .ok_or(StageError::MissingCredentials("terabox"))?;

    let page = ctx
        .send(
            HttpRequest::get(url)
                .header("User-Agent", ctx.user_agent)
                .cookies(&[("ndus", ndus)]),
        )
        .await?;
    first_capture(&TERABOX_DLINK, &page.body)
        .map(|raw| Hit::new(raw.replace("\\/", "/"), "terabox"))
        .ok_or_else(|| StageError::not_found("terabox: no dlink in page"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{HttpConnector, ReqwestConnector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fails every request and counts how many were attempted.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn send(&self, _req: HttpRequest, _t: Duration) -> Result<HttpResponse, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StageError::Transport("offline".to_string()))
        }
    }

    fn ctx<'a>(fetcher: &'a dyn Fetcher, creds: &'a Credentials) -> FamilyContext<'a> {
        FamilyContext {
            fetcher,
            credentials: creds,
            user_agent: "test-agent",
            fetch_timeout: Duration::from_secs(5),
            deadline: Deadline::after(Duration::from_secs(30)),
        }
    }

    #[test]
    fn test_family_names_roundtrip() {
        for f in [Family::Gdtot, Family::Sharerw, Family::Uptobox, Family::Terabox] {
            assert_eq!(Family::from_name(f.name()), Some(f));
        }
        assert_eq!(Family::from_name("ouo"), None);
    }

    #[tokio::test]
    async fn test_missing_credentials_make_no_calls() {
        let fetcher = CountingFetcher::default();
        let creds = Credentials {
            xsrf_token: Some("only-half".to_string()),
            uptobox_token: Some("   ".to_string()),
            ..Default::default()
        };
        for family in [Family::Gdtot, Family::Sharerw, Family::Uptobox, Family::Terabox] {
            let err = resolve(family, "https://host.example/file/1", &ctx(&fetcher, &creds))
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::MissingCredentials(_)));
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gdtot_location_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/123"))
            .and(header("Cookie", "crypt=secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<input type="hidden" name="token" value="tok42">"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/file"))
            .and(body_string_contains("token=tok42"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "https://cdn.example.com/dl/movie.mkv"),
            )
            .mount(&server)
            .await;

        let session = ReqwestConnector.session().unwrap();
        let creds = Credentials {
            gdtot_crypt: Some("secret".to_string()),
            ..Default::default()
        };
        let hit = resolve(
            Family::Gdtot,
            &format!("{}/file/123", server.uri()),
            &ctx(session.as_ref(), &creds),
        )
        .await
        .unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/dl/movie.mkv");
        assert_eq!(hit.tag, "gdtot");
    }

    #[tokio::test]
    async fn test_gdtot_drive_fallback_and_missing_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"name="token" value="t""#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>expired</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="https://drive.google.com/file/d/AbC_12-x/view">open</a>"#,
            ))
            .mount(&server)
            .await;

        let session = ReqwestConnector.session().unwrap();
        let creds = Credentials {
            gdtot_crypt: Some("secret".to_string()),
            ..Default::default()
        };
        let c = ctx(session.as_ref(), &creds);

        let hit = resolve(Family::Gdtot, &format!("{}/file/ok", server.uri()), &c)
            .await
            .unwrap();
        assert_eq!(hit.url, "https://drive.google.com/uc?id=AbC_12-x&export=download");

        let err = resolve(Family::Gdtot, &format!("{}/file/empty", server.uri()), &c)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingToken(_)));
    }

    #[tokio::test]
    async fn test_sharerw_generate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>$.post(url, { _token: "csrf99", id: "link7" });</script>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/link/generate"))
            .and(body_string_contains("_token=csrf99"))
            .and(body_string_contains("id=link7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "url": "https://cdn.example.com/get/link7"
            })))
            .mount(&server)
            .await;

        let session = ReqwestConnector.session().unwrap();
        let creds = Credentials {
            xsrf_token: Some("x".to_string()),
            laravel_session: Some("l".to_string()),
            ..Default::default()
        };
        let hit = resolve(
            Family::Sharerw,
            &format!("{}/file/abc", server.uri()),
            &ctx(session.as_ref(), &creds),
        )
        .await
        .unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/get/link7");
    }

    #[tokio::test]
    async fn test_uptobox_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/link"))
            .and(query_param("token", "tok"))
            .and(query_param("file_code", "f00d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "statusCode": 0,
                "data": { "dlLink": "https://www1.example.com/dl/f00d/file.zip" }
            })))
            .mount(&server)
            .await;

        let session = ReqwestConnector.session().unwrap();
        let creds = Credentials {
            uptobox_token: Some("tok".to_string()),
            ..Default::default()
        };
        let hit = resolve(
            Family::Uptobox,
            &format!("{}/f00d", server.uri()),
            &ctx(session.as_ref(), &creds),
        )
        .await
        .unwrap();
        assert_eq!(hit.url, "https://www1.example.com/dl/f00d/file.zip");
    }

    #[tokio::test]
    async fn test_terabox_unescapes_dlink() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Cookie", "ndus=n1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"window.data = {"dlink":"https:\/\/d.example.com\/file\/x?fid=1"};"#,
            ))
            .mount(&server)
            .await;

        let session = ReqwestConnector.session().unwrap();
        let creds = Credentials {
            terabox_cookie: Some("n1".to_string()),
            ..Default::default()
        };
        let hit = resolve(
            Family::Terabox,
            &format!("{}/s/1abc", server.uri()),
            &ctx(session.as_ref(), &creds),
        )
        .await
        .unwrap();
        assert_eq!(hit.url, "https://d.example.com/file/x?fid=1");
    }
}
