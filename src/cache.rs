//! Resolved-link cache
//!
//! The resolver only sees [`LinkCache`]. Stores own TTL eviction and hit
//! counting; a hit never returns an expired entry.

use crate::error::CacheError;
use crate::schema::CachedLink;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

#[async_trait]
pub trait LinkCache: Send + Sync {
    /// Fresh entry for `source_url`, counting the hit. Expired entries are dropped.
    async fn get(&self, source_url: &str) -> Result<Option<CachedLink>, CacheError>;

    /// Upsert. Replaces any previous entry wholesale.
    async fn put(
        &self,
        source_url: &str,
        direct_url: &str,
        strategy_tag: &str,
    ) -> Result<(), CacheError>;
}

/// Shared read-with-TTL logic for both stores.
fn take_hit(
    entries: &mut HashMap<String, CachedLink>,
    source_url: &str,
    ttl: chrono::Duration,
) -> (Option<CachedLink>, bool) {
    let now = Utc::now();
    let expired = match entries.get(source_url) {
        Some(link) => link.is_expired(ttl, now),
        None => return (None, false),
    };
    if expired {
        entries.remove(source_url);
        return (None, true);
    }
    match entries.get_mut(source_url) {
        Some(link) => {
            link.hit_count += 1;
            (Some(link.clone()), true)
        }
        None => (None, false),
    }
}

/// Process-local store.
pub struct MemoryCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, CachedLink>>,
}

impl MemoryCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a pre-built record (e.g. with a backdated `created_at`).
    pub async fn insert(&self, link: CachedLink) {
        self.entries
            .lock()
            .await
            .insert(link.source_url.clone(), link);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl LinkCache for MemoryCache {
    async fn get(&self, source_url: &str) -> Result<Option<CachedLink>, CacheError> {
        let mut entries = self.entries.lock().await;
        Ok(take_hit(&mut entries, source_url, self.ttl).0)
    }

    async fn put(
        &self,
        source_url: &str,
        direct_url: &str,
        strategy_tag: &str,
    ) -> Result<(), CacheError> {
        self.insert(CachedLink::new(source_url, direct_url, strategy_tag))
            .await;
        Ok(())
    }
}

/// YAML document on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    links: Vec<CachedLink>,
}

/// File-backed store: loads on open, rewrites the file after every change.
pub struct YamlCache {
    path: PathBuf,
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, CachedLink>>,
}

impl YamlCache {
    pub async fn open(path: impl Into<PathBuf>, ttl: chrono::Duration) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let file: CacheFile = if content.trim().is_empty() {
                CacheFile::default()
            } else {
                serde_yaml::from_str(&content)?
            };
            file.links
                .into_iter()
                .map(|l| (l.source_url.clone(), l))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            ttl,
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, CachedLink>) -> Result<(), CacheError> {
        let mut links: Vec<CachedLink> = entries.values().cloned().collect();
        // Sort for stable diffs
        links.sort_by(|a, b| a.source_url.cmp(&b.source_url));
        let yaml = serde_yaml::to_string(&CacheFile { links })?;
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }
}

#[async_trait]
impl LinkCache for YamlCache {
    async fn get(&self, source_url: &str) -> Result<Option<CachedLink>, CacheError> {
        let mut entries = self.entries.lock().await;
        let (hit, changed) = take_hit(&mut entries, source_url, self.ttl);
        if changed {
            self.persist(&entries).await?;
        }
        Ok(hit)
    }

    async fn put(
        &self,
        source_url: &str,
        direct_url: &str,
        strategy_tag: &str,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            source_url.to_string(),
            CachedLink::new(source_url, direct_url, strategy_tag),
        );
        self.persist(&entries).await
    }
}
