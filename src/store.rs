// src/store.rs
//! Small TTL key-value store backing the rollup buckets.
//!
//! Writes land in memory and mark the store dirty; a background task flushes
//! the whole map to `<dir>/<name>.json` on the store's own period. Nothing on
//! the `put`/`get` path touches the disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::Clock;

/// Key-value contract the rollup is written against.
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Store `value` under `key`, expiring after `ttl`.
    fn put(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    /// Live value for `key`, `None` if absent or expired.
    fn get(&self, key: &str) -> Option<i64>;

    fn get_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct Entry {
    value: i64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SimpleDb {
    name: String,
    file: Option<PathBuf>,
    sync_period: StdDuration,
    entries: RwLock<HashMap<String, Entry>>,
    dirty: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl SimpleDb {
    /// Open (or create) the store persisted at `<dir>/<name>.json`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged and
    /// also starts empty, as losing aggregates beats refusing to start.
    pub fn open(
        name: &str,
        dir: &Path,
        sync_period: StdDuration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating store directory {}", dir.display()))?;
        let file = dir.join(format!("{name}.json"));

        let now = clock.now();
        let entries = match std::fs::read_to_string(&file) {
            Ok(s) => match serde_json::from_str::<HashMap<String, Entry>>(&s) {
                Ok(mut map) => {
                    map.retain(|_, e| e.expires_at > now);
                    map
                }
                Err(e) => {
                    tracing::warn!(store = name, error = %e, "corrupt store file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(store = name, error = %e, "unreadable store file, starting empty");
                HashMap::new()
            }
        };
        tracing::debug!(store = name, entries = entries.len(), "store opened");

        Ok(Self {
            name: name.to_string(),
            file: Some(file),
            sync_period,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            clock,
        })
    }

    /// Store without a backing file.
    pub fn in_memory(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            file: None,
            sync_period: StdDuration::from_secs(60),
            entries: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the live entries to disk if anything changed since the last flush.
    ///
    /// Uses a temp file + rename so a crash mid-write leaves the previous
    /// snapshot intact.
    pub async fn flush(&self) -> Result<()> {
        let Some(file) = &self.file else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let body = {
            let now = self.clock.now();
            let mut entries = self.entries.write();
            entries.retain(|_, e| e.expires_at > now);
            serde_json::to_vec(&*entries)
        };
        let body = match body {
            Ok(b) => b,
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                return Err(e).with_context(|| format!("serializing store {}", self.name));
            }
        };

        let written = write_atomically(file, &body).await;
        if written.is_err() {
            // Retry on the next period.
            self.dirty.store(true, Ordering::Release);
        }
        written
    }

    /// Flush periodically until the handle is aborted.
    pub fn spawn_sync_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sync_period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.flush().await {
                    tracing::warn!(store = %self.name, error = ?e, "store sync failed");
                    metrics::counter!("store_sync_errors_total").increment(1);
                }
            }
        })
    }
}

async fn write_atomically(file: &Path, body: &[u8]) -> Result<()> {
    let tmp = file.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, file)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), file.display()))
}

impl KvStore for SimpleDb {
    fn put(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<i64> {
        let now = self.clock.now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value)
    }
}
