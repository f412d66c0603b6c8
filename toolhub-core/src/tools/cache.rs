//! Result cache for tool invocations
//!
//! Entries never expire on their own; they live until invalidated or
//! cleared. Optionally every mutation is journaled to disk by a write-back
//! worker fed through a bounded queue, and [`ResultCache::restore`] replays
//! that journal at startup.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tool_name: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub invalidations: u64,
}

/// One journaled cache mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    Put {
        key: String,
        tool_name: String,
        value: Value,
    },
    Invalidate {
        key: String,
    },
    InvalidateTool {
        tool_name: String,
    },
    Clear,
}

/// How the write-back worker ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBackSummary {
    pub written: usize,
    /// Writes discarded because the worker was cancelled
    pub discarded: usize,
}

/// Background worker appending journal entries to a file
pub struct CacheWriteBack {
    sender: mpsc::Sender<JournalEntry>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<WriteBackSummary>>,
}

impl CacheWriteBack {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_write_back(path, receiver, cancel.clone()));
        Self {
            sender,
            cancel,
            handle,
        }
    }

    /// Close the queue and wait until every pending write has landed
    pub async fn shutdown(self) -> Result<WriteBackSummary> {
        drop(self.sender);
        self.handle.await.context("cache write-back worker panicked")?
    }

    /// Stop immediately, reporting how many queued writes were discarded
    pub async fn cancel(self) -> Result<WriteBackSummary> {
        self.cancel.cancel();
        drop(self.sender);
        self.handle.await.context("cache write-back worker panicked")?
    }
}

async fn run_write_back(
    path: PathBuf,
    mut receiver: mpsc::Receiver<JournalEntry>,
    cancel: CancellationToken,
) -> Result<WriteBackSummary> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to open cache journal {}", path.display()))?;

    let mut summary = WriteBackSummary::default();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                receiver.close();
                while receiver.try_recv().is_ok() {
                    summary.discarded += 1;
                }
                if summary.discarded > 0 {
                    warn!(discarded = summary.discarded, "cache write-back cancelled with pending writes");
                }
                break;
            }
            entry = receiver.recv() => {
                let Some(entry) = entry else { break };
                let mut line = serde_json::to_string(&entry)?;
                line.push('\n');
                file.write_all(line.as_bytes()).await?;
                summary.written += 1;
            }
        }
    }
    file.flush().await?;
    debug!(written = summary.written, path = %path.display(), "cache write-back finished");
    Ok(summary)
}

pub struct ResultCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    enabled: bool,
    write_back: parking_lot::Mutex<Option<CacheWriteBack>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_entries(HashMap::new(), true)
    }

    /// A cache that never stores anything; every lookup misses uncounted
    pub fn disabled() -> Self {
        Self::with_entries(HashMap::new(), false)
    }

    fn with_entries(entries: HashMap<String, CacheEntry>, enabled: bool) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            enabled,
            write_back: parking_lot::Mutex::new(None),
        }
    }

    /// Build a cache per configuration, replaying and then appending to the
    /// journal when persistence is configured.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        if !config.enabled {
            debug!("result cache disabled by configuration");
            return Ok(Self::disabled());
        }
        match &config.persist_path {
            Some(path) => {
                let cache = Self::restore(path)?;
                Ok(cache.with_write_back(path, config.write_queue_capacity))
            }
            None => Ok(Self::new()),
        }
    }

    /// Rebuild a cache from a journal file. A missing file yields an empty cache.
    pub fn restore(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut entries: HashMap<String, CacheEntry> = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read cache journal {}", path.display()))?;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: JournalEntry = match serde_json::from_str(line) {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(line = line_no + 1, error = %err, "skipping corrupt cache journal line");
                        continue;
                    }
                };
                apply(&mut entries, entry);
            }
            info!(entries = entries.len(), path = %path.display(), "result cache restored");
        }
        Ok(Self::with_entries(entries, true))
    }

    pub fn with_write_back(self, path: impl Into<PathBuf>, capacity: usize) -> Self {
        if self.enabled {
            *self.write_back.lock() = Some(CacheWriteBack::spawn(path, capacity));
        }
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_write_back(&self) -> bool {
        self.write_back.lock().is_some()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let found = self
            .entries
            .read()
            .await
            .get(key)
            .map(|entry| entry.value.clone());

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn put(&self, key: String, tool_name: &str, value: Value) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            tool_name: tool_name.to_string(),
            value: value.clone(),
            stored_at: Utc::now(),
        };
        self.entries.write().await.insert(key.clone(), entry);

        self.journal(JournalEntry::Put {
            key,
            tool_name: tool_name.to_string(),
            value,
        })
        .await;
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            self.journal(JournalEntry::Invalidate {
                key: key.to_string(),
            })
            .await;
        }
        removed
    }

    /// Drop every entry produced by `tool_name`
    pub async fn invalidate_tool(&self, tool_name: &str) -> usize {
        let removed = {
            let mut cache = self.entries.write().await;
            let before = cache.len();
            cache.retain(|_, entry| entry.tool_name != tool_name);
            before - cache.len()
        };
        if removed > 0 {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            self.journal(JournalEntry::InvalidateTool {
                tool_name: tool_name.to_string(),
            })
            .await;
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.journal(JournalEntry::Clear).await;
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len().await,
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drain pending journal writes and stop the worker
    pub async fn shutdown(&self) -> Result<Option<WriteBackSummary>> {
        let worker = self.write_back.lock().take();
        match worker {
            Some(worker) => worker.shutdown().await.map(Some),
            None => Ok(None),
        }
    }

    /// Stop the worker without draining
    pub async fn cancel(&self) -> Result<Option<WriteBackSummary>> {
        let worker = self.write_back.lock().take();
        match worker {
            Some(worker) => worker.cancel().await.map(Some),
            None => Ok(None),
        }
    }

    async fn journal(&self, entry: JournalEntry) {
        let sender = self
            .write_back
            .lock()
            .as_ref()
            .map(|worker| worker.sender.clone());
        if let Some(sender) = sender
            && sender.send(entry).await.is_err()
        {
            warn!("cache write-back worker stopped; journal entry not persisted");
        }
    }
}

fn apply(entries: &mut HashMap<String, CacheEntry>, entry: JournalEntry) {
    match entry {
        JournalEntry::Put {
            key,
            tool_name,
            value,
        } => {
            entries.insert(
                key,
                CacheEntry {
                    tool_name,
                    value,
                    stored_at: Utc::now(),
                },
            );
        }
        JournalEntry::Invalidate { key } => {
            entries.remove(&key);
        }
        JournalEntry::InvalidateTool { tool_name } => {
            entries.retain(|_, entry| entry.tool_name != tool_name);
        }
        JournalEntry::Clear => entries.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn hits_and_misses_are_counted() {
        let cache = ResultCache::new();
        assert!(cache.get("k").await.is_none());
        cache.put("k".into(), "echo", json!({"ok": true})).await;
        assert_eq!(cache.get("k").await, Some(json!({"ok": true})));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn disabled_cache_stores_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let config = CacheConfig {
            enabled: false,
            persist_path: Some(dir.path().join("journal.jsonl")),
            ..CacheConfig::default()
        };
        let cache = ResultCache::from_config(&config)?;
        assert!(!cache.is_enabled());
        assert!(!cache.has_write_back());

        cache.put("k".into(), "echo", json!(1)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().await, CacheStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_by_key_and_tool() {
        let cache = ResultCache::new();
        cache.put("a1".into(), "a", json!(1)).await;
        cache.put("a2".into(), "a", json!(2)).await;
        cache.put("b1".into(), "b", json!(3)).await;

        assert!(cache.invalidate("b1").await);
        assert!(!cache.invalidate("b1").await);
        assert_eq!(cache.invalidate_tool("a").await, 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn journal_round_trips_through_restore() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("cache").join("journal.jsonl");

        let cache = ResultCache::new().with_write_back(&path, 2);
        for i in 0..10 {
            cache.put(format!("k{i}"), "echo", json!(i)).await;
        }
        cache.invalidate("k3").await;
        let summary = cache.shutdown().await?.expect("worker attached");
        assert_eq!(summary.written, 11);
        assert_eq!(summary.discarded, 0);

        let restored = ResultCache::restore(&path)?;
        assert_eq!(restored.len().await, 9);
        assert_eq!(restored.get("k7").await, Some(json!(7)));
        assert!(restored.get("k3").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cancel_stops_worker() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = ResultCache::new().with_write_back(dir.path().join("j.jsonl"), 8);
        cache.put("k".into(), "echo", json!(1)).await;
        let summary = cache.cancel().await?.expect("worker attached");
        assert_eq!(summary.written + summary.discarded, 1);
        assert!(!cache.has_write_back());
        Ok(())
    }
}
