//! resolve command: turn gated links into direct download URLs
//!
//! LLM-optimized output - one compact JSON object per URL on stdout.

use crate::browser::{BrowserLauncher, ChromeLauncher};
use crate::cache::{LinkCache, YamlCache};
use crate::classify::table_from;
use crate::config::{BrowserTimings, Credentials, EngineConfig, DEFAULT_USER_AGENT};
use crate::error::FailureKind;
use crate::extract::{extract_urls, normalized_host};
use crate::fetch::{truncate, ReqwestConnector};
use crate::logging::init_logging;
use crate::resolver::Resolver;
use crate::schema::ResolutionResult;
use crate::toolkit::{BrowserEvaluator, NoEvaluator, ScriptEvaluator};
use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args)]
pub struct ResolveArgs {
    /// Links to resolve
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Read links from stdin (one or more per line)
    #[arg(long)]
    stdin: bool,

    /// gdtot `crypt` cookie
    #[arg(long, env = "GDTOT_CRYPT", hide_env_values = true)]
    gdtot_crypt: Option<String>,

    /// sharer `XSRF-TOKEN` cookie
    #[arg(long, env = "XSRF_TOKEN", hide_env_values = true)]
    xsrf_token: Option<String>,

    /// sharer `laravel_session` cookie
    #[arg(long, env = "LARAVEL_SESSION", hide_env_values = true)]
    laravel_session: Option<String>,

    /// uptobox API token
    #[arg(long, env = "UPTOBOX_TOKEN", hide_env_values = true)]
    uptobox_token: Option<String>,

    /// terabox `ndus` cookie
    #[arg(long, env = "TERA_COOKIE", hide_env_values = true)]
    tera_cookie: Option<String>,

    /// `cf_clearance` cookie; enables the protection bypass stage
    #[arg(long, env = "CLOUDFLARE_COOKIE", hide_env_values = true)]
    cloudflare_cookie: Option<String>,

    /// Timeout per HTTP request in milliseconds
    #[arg(long, default_value = "15000")]
    timeout: u64,

    /// Overall budget per link in milliseconds
    #[arg(long, default_value = "180000")]
    deadline: u64,

    /// Browser navigation timeout in milliseconds
    #[arg(long, default_value = "30000")]
    nav_timeout: u64,

    /// YAML family table replacing the built-in one
    #[arg(long, env = "DLINK_SITES")]
    sites: Option<PathBuf>,

    /// YAML file caching resolved links
    #[arg(long, env = "DLINK_CACHE")]
    cache: Option<PathBuf>,

    /// Days a cached link stays valid
    #[arg(long, default_value = "30")]
    cache_ttl_days: i64,

    /// Refuse links on this domain (and its subdomains)
    #[arg(long = "restrict", value_name = "DOMAIN", env = "RESTRICTED_DOMAINS", value_delimiter = ',')]
    restricted: Vec<String>,

    /// Skip every browser-driven stage
    #[arg(long)]
    no_browser: bool,

    /// Log stage progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl ResolveArgs {
    fn credentials(&self) -> Credentials {
        Credentials {
            gdtot_crypt: self.gdtot_crypt.clone(),
            xsrf_token: self.xsrf_token.clone(),
            laravel_session: self.laravel_session.clone(),
            uptobox_token: self.uptobox_token.clone(),
            terabox_cookie: self.tera_cookie.clone(),
            cloudflare_clearance: self.cloudflare_cookie.clone(),
        }
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            credentials: self.credentials(),
            fetch_timeout: Duration::from_millis(self.timeout),
            request_deadline: Duration::from_millis(self.deadline),
            browser: BrowserTimings {
                nav_timeout: Duration::from_millis(self.nav_timeout),
                ..Default::default()
            },
            browser_enabled: !self.no_browser,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Run the resolve command
pub async fn run_resolve(args: ResolveArgs) -> Result<()> {
    init_logging(args.verbose);

    let urls = get_urls(&args)?;
    if urls.is_empty() {
        eprintln!("Usage:");
        eprintln!("  dlink resolve <URL>...       Resolve one or more links");
        eprintln!("  dlink resolve --stdin        Read links from stdin");
        std::process::exit(1);
    }

    let config = args.engine_config();
    let launcher: Arc<dyn BrowserLauncher> =
        Arc::new(ChromeLauncher::new(config.browser.clone(), config.user_agent.clone()));
    let evaluator: Arc<dyn ScriptEvaluator> = if config.browser_enabled {
        Arc::new(BrowserEvaluator::new(Arc::clone(&launcher), config.browser.nav_timeout))
    } else {
        Arc::new(NoEvaluator)
    };

    let mut resolver = Resolver::new(config, Arc::new(ReqwestConnector), launcher)
        .with_sites(table_from(&args.sites).await?)
        .with_evaluator(evaluator);
    if let Some(path) = &args.cache {
        let cache = YamlCache::open(path, chrono::Duration::days(args.cache_ttl_days))
            .await
            .with_context(|| format!("Failed to open cache {}", path.display()))?;
        resolver = resolver.with_cache(Arc::new(cache) as Arc<dyn LinkCache>);
    }

    eprintln!("Resolving {} URLs...", urls.len());

    let mut ok = 0;
    for url in &urls {
        eprintln!("  -> {}", truncate(url, 60));
        let result = match restricted_match(url, &args.restricted) {
            Some(domain) => ResolutionResult::failure(
                url,
                FailureKind::UnsupportedSite,
                format!("Domain {} is restricted", domain),
            ),
            None => resolver.resolve(url).await,
        };
        if result.success {
            ok += 1;
        }
        println!("{}", serde_json::to_string(&result)?);
    }

    eprintln!("Done: {}/{} OK", ok, urls.len());
    Ok(())
}

/// Positional URLs, then stdin when asked for.
fn get_urls(args: &ResolveArgs) -> Result<Vec<String>> {
    let mut urls: Vec<String> = args.urls.iter().map(|u| u.trim().to_string()).collect();

    if args.stdin {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line.context("Failed to read stdin")?;
            urls.extend(extract_urls(&line));
        }
    }

    urls.retain(|u| !u.is_empty());
    Ok(urls)
}

/// The restricted domain `url` falls under, if any.
fn restricted_match<'a>(url: &str, restricted: &'a [String]) -> Option<&'a str> {
    let host = normalized_host(url)?;
    restricted
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .find(|d| {
            let d = d.trim_start_matches("www.").to_lowercase();
            host == d || host.ends_with(&format!(".{}", d))
        })
}
