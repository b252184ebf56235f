//! End-to-end resolver tests against local HTTP mocks (no Chrome needed)

use async_trait::async_trait;
use dlink::browser::{BrowserLauncher, BrowserSession};
use dlink::fetch::ReqwestConnector;
use dlink::{
    BrowserTimings, Credentials, EngineConfig, FailureKind, ResolutionRequest, Resolver,
    StageError, YamlCache,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Launcher for machines without Chrome; counts attempts.
#[derive(Default)]
struct NoChrome {
    launches: AtomicUsize,
}

#[async_trait]
impl BrowserLauncher for NoChrome {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, StageError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Err(StageError::Browser("chrome not installed".to_string()))
    }
}

fn config(credentials: Credentials) -> EngineConfig {
    EngineConfig {
        credentials,
        fetch_timeout: Duration::from_secs(5),
        request_deadline: Duration::from_secs(30),
        browser: BrowserTimings::instant(),
        browser_enabled: false,
        ..Default::default()
    }
}

fn resolver(credentials: Credentials) -> Resolver {
    Resolver::new(
        config(credentials),
        Arc::new(ReqwestConnector),
        Arc::new(NoChrome::default()),
    )
}

async fn serve(server: &MockServer, at: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_hidden_link_wins_over_query_param() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/go",
        r#"<html><body>
            <div class="d-none"><a href="https://files.example.com/get/abc.zip">mirror</a></div>
            <p>Redirecting...</p>
        </body></html>"#,
    )
    .await;

    let url = format!("{}/go?url=https://other.example.com/pack.rar", server.uri());
    let result = resolver(Credentials::default()).resolve(&url).await;

    assert!(result.success);
    assert_eq!(result.strategy_tag, "css_hidden");
    assert_eq!(
        result.direct_url.as_deref(),
        Some("https://files.example.com/get/abc.zip")
    );
}

#[tokio::test]
async fn test_generic_pass_finds_worded_anchor() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/page",
        r#"<a href="https://mirror.example.com/get/7">Fetch from mirror</a>"#,
    )
    .await;

    let result = resolver(Credentials::default())
        .resolve(&format!("{}/page", server.uri()))
        .await;

    assert!(result.success);
    assert_eq!(result.strategy_tag, "generic");
}

#[tokio::test]
async fn test_uptobox_family_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/link"))
        .and(query_param("token", "tok"))
        .and(query_param("file_code", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "statusCode": 0,
            "data": { "dlLink": "https://www1.uptobox.example/dl/abc123/movie.mkv" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials {
        uptobox_token: Some("tok".to_string()),
        ..Default::default()
    };
    let request = ResolutionRequest::new(format!("{}/abc123", server.uri()), credentials.clone())
        .with_family("uptobox");
    let result = resolver(credentials).resolve_request(&request).await;

    assert!(result.success);
    assert_eq!(result.strategy_tag, "uptobox");
}

#[tokio::test]
async fn test_clearance_cookie_unlocks_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header_regex("cookie", "cf_clearance=clear"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<p>Ready: <a href="https://cdn.example.com/files/movie.mkv">movie</a></p>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string("<title>Just a moment...</title>"),
        )
        .mount(&server)
        .await;

    let credentials = Credentials {
        cloudflare_clearance: Some("clear".to_string()),
        ..Default::default()
    };
    let result = resolver(credentials)
        .resolve(&format!("{}/protected", server.uri()))
        .await;

    assert!(result.success);
    assert_eq!(result.strategy_tag, "cloudflare");
    assert_eq!(
        result.direct_url.as_deref(),
        Some("https://cdn.example.com/files/movie.mkv")
    );
}

#[tokio::test]
async fn test_missing_chrome_is_a_stage_failure() {
    let server = MockServer::start().await;
    serve(&server, "/empty", "<p>nothing to see</p>").await;

    let launcher = Arc::new(NoChrome::default());
    let mut cfg = config(Credentials::default());
    cfg.browser_enabled = true;
    let resolver = Resolver::new(cfg, Arc::new(ReqwestConnector), launcher.clone());
    let url = format!("{}/empty", server.uri());
    let result = resolver.resolve(&url).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::UnsupportedSite));
    let error = result.error.unwrap();
    assert!(error.contains(&url));
    assert!(!error.contains("chrome"));
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_yaml_cache_serves_second_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/m"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<meta http-equiv="refresh" content="0;url=https://cdn.example.com/movie.mp4">"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("links.yaml");
    let url = format!("{}/m", server.uri());

    let cache = YamlCache::open(&cache_path, chrono::Duration::days(30))
        .await
        .unwrap();
    let first = resolver(Credentials::default())
        .with_cache(Arc::new(cache))
        .resolve(&url)
        .await;
    assert!(first.success);

    let reopened = YamlCache::open(&cache_path, chrono::Duration::days(30))
        .await
        .unwrap();
    let second = resolver(Credentials::default())
        .with_cache(Arc::new(reopened))
        .resolve(&url)
        .await;
    assert!(second.cached);
    assert_eq!(second.direct_url, first.direct_url);
}
