#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::domain::SegmentKey;
use crate::error::Error;
use bytes::Bytes;
use dashmap::DashMap;
use humansize::{BINARY, format_size};
use itertools::Itertools;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy)]
struct DiskEntry {
    size: u64,
    written_at: SystemTime,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub freed_bytes: u64,
}

/// Warm tier: one file per segment under `<root>/<task>/`, expiring a fixed
/// time after its last write.
pub struct DiskTier {
    root: PathBuf,
    max_bytes: u64,
    ttl: Duration,
    index: DashMap<SegmentKey, DiskEntry>,
    total_bytes: AtomicU64,
    tmp_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl DiskTier {
    /// Open the tier at `root`, adopting segment files left by a previous run.
    pub async fn open(
        root: impl Into<PathBuf>,
        max_bytes: u64,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let tier = Self {
            root,
            max_bytes,
            ttl,
            index: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            tmp_seq: AtomicU64::new(0),
            clock,
        };
        tier.rebuild_index().await?;
        info!(
            root = %tier.root.display(),
            entries = tier.entry_count(),
            size = %format_size(tier.total_bytes(), BINARY),
            "disk tier opened"
        );
        Ok(tier)
    }

    pub async fn get(&self, key: &SegmentKey) -> Option<Bytes> {
        let entry = *self.index.get(key)?;
        if self.is_expired(&entry) {
            trace!(%key, "disk tier entry expired");
            self.remove(key).await;
            return None;
        }

        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!(%key, %err, "disk tier read failed");
                }
                self.forget(key);
                None
            }
        }
    }

    /// Write `bytes` for `key`. The file appears atomically: readers see
    /// either the previous complete value or the new one.
    pub async fn put(&self, key: &SegmentKey, bytes: &Bytes) -> Result<(), Error> {
        let dir = self.task_dir(key.stream_task_id());
        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            key.file_name(),
            self.tmp_seq.fetch_add(1, Ordering::Relaxed)
        ));
        let write = async {
            fs::create_dir_all(&dir).await?;
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, self.path_for(key)).await
        };
        if let Err(source) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::CacheWrite { key: *key, source });
        }

        let entry = DiskEntry {
            size: bytes.len() as u64,
            written_at: self.clock.now(),
        };
        self.track(*key, entry);
        self.enforce_capacity().await;
        Ok(())
    }

    /// Present and not yet expired.
    pub fn contains(&self, key: &SegmentKey) -> bool {
        self.index
            .get(key)
            .is_some_and(|entry| !self.is_expired(&entry))
    }

    /// Drop every segment of one stream task.
    pub async fn remove_task(&self, stream_task_id: u64) -> usize {
        let keys: Vec<SegmentKey> = self
            .index
            .iter()
            .filter(|entry| entry.key().stream_task_id() == stream_task_id)
            .map(|entry| *entry.key())
            .collect();
        for key in &keys {
            self.forget(key);
        }

        let dir = self.task_dir(stream_task_id);
        if let Err(err) = fs::remove_dir_all(&dir).await
            && err.kind() != ErrorKind::NotFound
        {
            warn!(dir = %dir.display(), %err, "failed to remove task directory");
        }
        keys.len()
    }

    pub async fn clear(&self) {
        let tasks: Vec<u64> = self
            .index
            .iter()
            .map(|entry| entry.key().stream_task_id())
            .unique()
            .collect();
        for task in tasks {
            self.remove_task(task).await;
        }
    }

    /// Delete every entry whose TTL has passed.
    pub async fn cleanup_expired(&self) -> CleanupReport {
        let expired: Vec<(SegmentKey, u64)> = self
            .index
            .iter()
            .filter(|entry| self.is_expired(entry.value()))
            .map(|entry| (*entry.key(), entry.value().size))
            .collect();

        let mut report = CleanupReport::default();
        for (key, size) in expired {
            self.remove(&key).await;
            report.removed += 1;
            report.freed_bytes += size;
        }
        if report.removed > 0 {
            info!(
                removed = report.removed,
                freed = %format_size(report.freed_bytes, BINARY),
                "disk tier cleanup"
            );
        }
        report
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, stream_task_id: u64) -> PathBuf {
        self.root.join(stream_task_id.to_string())
    }

    fn path_for(&self, key: &SegmentKey) -> PathBuf {
        self.task_dir(key.stream_task_id()).join(key.file_name())
    }

    fn is_expired(&self, entry: &DiskEntry) -> bool {
        self.clock
            .now()
            .duration_since(entry.written_at)
            .is_ok_and(|age| age > self.ttl)
    }

    fn track(&self, key: SegmentKey, entry: DiskEntry) {
        self.total_bytes.fetch_add(entry.size, Ordering::Relaxed);
        if let Some(previous) = self.index.insert(key, entry) {
            self.total_bytes.fetch_sub(previous.size, Ordering::Relaxed);
        }
    }

    fn forget(&self, key: &SegmentKey) -> Option<DiskEntry> {
        let (_, entry) = self.index.remove(key)?;
        self.total_bytes.fetch_sub(entry.size, Ordering::Relaxed);
        Some(entry)
    }

    /// Drop one entry and its file.
    pub async fn remove(&self, key: &SegmentKey) {
        if self.forget(key).is_none() {
            return;
        }
        if let Err(err) = fs::remove_file(self.path_for(key)).await
            && err.kind() != ErrorKind::NotFound
        {
            warn!(%key, %err, "failed to delete disk tier entry");
        }
    }

    /// Delete the oldest writes until the tier fits its bound.
    async fn enforce_capacity(&self) {
        if self.total_bytes() <= self.max_bytes {
            return;
        }
        let oldest_first: Vec<SegmentKey> = self
            .index
            .iter()
            .map(|entry| (*entry.key(), entry.value().written_at))
            .sorted_by_key(|(_, written_at)| *written_at)
            .map(|(key, _)| key)
            .collect();

        for key in oldest_first {
            if self.total_bytes() <= self.max_bytes {
                break;
            }
            debug!(%key, "disk tier over capacity, evicting");
            self.remove(&key).await;
        }
    }

    async fn rebuild_index(&self) -> Result<(), Error> {
        let mut tasks = fs::read_dir(&self.root).await?;
        while let Some(task_dir) = tasks.next_entry().await? {
            let Some(stream_task_id) = task_dir
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };
            if !task_dir.file_type().await?.is_dir() {
                continue;
            }

            let mut files = fs::read_dir(task_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if name.ends_with(".tmp") {
                    trace!(file = name, "removing interrupted write");
                    let _ = fs::remove_file(file.path()).await;
                    continue;
                }
                let Some(key) = SegmentKey::from_file_name(stream_task_id, name) else {
                    continue;
                };
                let metadata = file.metadata().await?;
                let written_at = metadata.modified().unwrap_or_else(|_| self.clock.now());
                self.track(
                    key,
                    DiskEntry {
                        size: metadata.len(),
                        written_at,
                    },
                );
            }
        }
        Ok(())
    }
}
