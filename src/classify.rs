//! Site classifier: URL → known site family
//!
//! Also hosts the `classify` and `sites` commands.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::extract::normalized_host;

/// One row of the family table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyEntry {
    pub name: String,
    pub domains: Vec<String>,
}

impl FamilyEntry {
    fn new(name: &str, domains: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
        }
    }
}

/// Ordered family table. Read-only while resolving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteTable {
    entries: Vec<FamilyEntry>,
}

impl Default for SiteTable {
    fn default() -> Self {
        Self::new(vec![
            FamilyEntry::new("gdtot", &["gdtot", "gdflix", "gd.com"]),
            FamilyEntry::new("sharerw", &["sharer.pw", "filepress"]),
            FamilyEntry::new("uptobox", &["uptobox.com"]),
            FamilyEntry::new("terabox", &["terabox.com", "1024tera.com", "teraboxapp.com"]),
            FamilyEntry::new("anonfiles", &["anonfiles.com", "bayfiles.com"]),
            FamilyEntry::new("linkvertise", &["linkvertise.com", "link-to.net", "up-to-down.net"]),
            FamilyEntry::new("adfly", &["adf.ly", "ay.gy", "j.gs"]),
            FamilyEntry::new("gplinks", &["gplinks.co", "gplinks.in"]),
            FamilyEntry::new("ouo", &["ouo.io", "ouo.press"]),
            FamilyEntry::new("shortingly", &["shortingly.in", "bit.ly"]),
            FamilyEntry::new("droplink", &["droplink.co", "droplink.org"]),
            FamilyEntry::new("linkbox", &["linkbox.to"]),
            FamilyEntry::new("wetransfer", &["wetransfer.com"]),
        ])
    }
}

impl SiteTable {
    pub fn new(entries: Vec<FamilyEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|mut e| {
                e.domains = e.domains.iter().map(|d| d.trim().to_lowercase()).collect();
                e.domains.retain(|d| !d.is_empty());
                e
            })
            .collect();
        Self { entries }
    }

    /// First family (in table order) with a domain substring of the host.
    ///
    /// Total: anything that does not parse or has no host is `None`.
    pub fn classify(&self, url: &str) -> Option<String> {
        let host = normalized_host(url)?;
        self.entries
            .iter()
            .find(|e| e.domains.iter().any(|d| host.contains(d.as_str())))
            .map(|e| e.name.clone())
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.classify(url).is_some()
    }

    /// Every domain substring, sorted and deduplicated.
    pub fn supported_domains(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|e| e.domains.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Args)]
pub struct ClassifyArgs {
    /// URL to classify
    pub url: String,

    /// YAML family table replacing the built-in one
    #[arg(long, env = "DLINK_SITES")]
    pub sites: Option<PathBuf>,
}

#[derive(Args)]
pub struct SitesArgs {
    /// YAML family table replacing the built-in one
    #[arg(long, env = "DLINK_SITES")]
    pub sites: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ClassifyOutput<'a> {
    url: &'a str,
    family: Option<String>,
}

pub(crate) async fn table_from(path: &Option<PathBuf>) -> Result<SiteTable> {
    match path {
        Some(p) => crate::config::load_site_table(p).await,
        None => Ok(SiteTable::default()),
    }
}

pub async fn run_classify(args: ClassifyArgs) -> Result<()> {
    let table = table_from(&args.sites).await?;
    let output = ClassifyOutput {
        url: &args.url,
        family: table.classify(&args.url),
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

pub async fn run_sites(args: SitesArgs) -> Result<()> {
    let table = table_from(&args.sites).await?;
    println!("{}", serde_json::to_string(&table.supported_domains())?);
    Ok(())
}
