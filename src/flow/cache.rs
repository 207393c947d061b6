// SPDX-License-Identifier: MIT

//! TTL cache for structured LLM responses
//!
//! Entries are keyed by a SHA-256 of everything that influences the model's
//! answer. Expired entries read as misses and are removed on the spot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::flow::error::CacheError;

/// A stored response with its expiry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            value,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Persistence behind a [`CacheManager`]
///
/// `get` must check expiry and evict under the same lock a concurrent `set`
/// takes, so a fresh write is never removed as stale.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the entry for `key` if present and not expired at `now`
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry expired at `now`, returning how many were removed
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError>;
}

/// One YAML file per key under a directory
pub struct FileCacheStore {
    dir: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", key))
    }

    /// Read an entry file; corrupted files are removed and read as absent
    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_yaml::from_str::<CacheEntry>(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                log::warn!("Removing corrupted cache file {}: {}", path.display(), e);
                remove_if_exists(path).await?;
                Ok(None)
            }
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(key);

        match self.read_entry(&path).await? {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry)),
            Some(_) => {
                remove_if_exists(&path).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let content = serde_yaml::to_string(&entry)?;
        // Write beside the target then rename so readers only ever see whole files
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));

        let _guard = self.lock.lock().await;
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(key)).await {
            remove_if_exists(&tmp).await?;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        remove_if_exists(&self.path_for(key)).await
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().await;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            match self.read_entry(&path).await? {
                Some(entry) if entry.is_expired(now) => {
                    remove_if_exists(&path).await?;
                    removed += 1;
                }
                Some(_) => {}
                // corrupted, already removed by read_entry
                None => removed += 1,
            }
        }

        Ok(removed)
    }
}

/// In-process store, mostly for tests and short-lived evaluators
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}

/// TTL cache in front of a [`CacheStore`]
///
/// A zero TTL disables the cache: every lookup misses and nothing is written.
/// Store failures are logged and treated as misses.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic key over everything that shapes the model's answer
    pub fn generate_key(
        system_prompt: Option<&str>,
        prompt: &str,
        model: &str,
        temperature: f32,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b"\n");
        hasher.update(temperature.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(system_prompt.unwrap_or_default().as_bytes());
        hasher.update(b"\n");
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }
        match self.store.get(key, Utc::now()).await {
            Ok(entry) => entry.map(|e| e.value),
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &Value) {
        if !self.is_enabled() {
            return;
        }
        let entry = CacheEntry::new(value.clone(), self.ttl, Utc::now());
        if let Err(e) = self.store.set(key, entry).await {
            log::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    pub async fn evict_expired(&self) -> usize {
        match self.store.evict_expired(Utc::now()).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Cache eviction failed: {}", e);
                0
            }
        }
    }
}
