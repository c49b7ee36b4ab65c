//! Cache stores resolving `(archive, group)` to raw group bytes.
//!
//! Lookups may be slow, so they are async and run off the tick loop. A miss
//! is `None`, never an error: the client may be asking for a group that is
//! being repackaged.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{LobbyError, Result};

/// Lookup priority requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Urgent,
    Prefetch,
}

pub trait CacheStore: Send + Sync + 'static {
    /// Archive ids the client should download before anything else.
    fn prefetches(&self) -> &[u32];

    /// Raw contents of one group, or `None` if it does not exist.
    fn get_group(
        &self,
        archive: u8,
        group: u32,
        priority: Priority,
    ) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

/// Cache pack laid out on disk as `<root>/<archive>/<group>.dat`.
///
/// The prefetch table lives beside the archives in `prefetch.bin`, a
/// bincode-encoded `Vec<u32>`.
pub struct DiskCacheStore {
    root: PathBuf,
    prefetches: Vec<u32>,
    prefetch_permits: Arc<Semaphore>,
}

impl DiskCacheStore {
    pub const PREFETCH_TABLE: &'static str = "prefetch.bin";

    pub async fn load<P: AsRef<Path>>(root: P, prefetch_concurrency: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(LobbyError::Cache(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let prefetches = match tokio::fs::read(root.join(Self::PREFETCH_TABLE)).await {
            Ok(bytes) => bincode::deserialize::<Vec<u32>>(&bytes)
                .map_err(|e| LobbyError::Cache(format!("bad prefetch table: {}", e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No prefetch table in {}, advertising none", root.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Loaded cache pack {} ({} prefetch entries)",
            root.display(),
            prefetches.len()
        );

        Ok(Self {
            root,
            prefetches,
            prefetch_permits: Arc::new(Semaphore::new(prefetch_concurrency)),
        })
    }

    fn group_path(&self, archive: u8, group: u32) -> PathBuf {
        self.root
            .join(archive.to_string())
            .join(format!("{}.dat", group))
    }
}

impl CacheStore for DiskCacheStore {
    fn prefetches(&self) -> &[u32] {
        &self.prefetches
    }

    async fn get_group(&self, archive: u8, group: u32, priority: Priority) -> Option<Vec<u8>> {
        // Prefetch reads queue behind a small pool so urgent reads are not starved
        let _permit = match priority {
            Priority::Urgent => None,
            Priority::Prefetch => self.prefetch_permits.clone().acquire_owned().await.ok(),
        };

        let path = self.group_path(archive, group);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Cache held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStore {
    prefetches: Vec<u32>,
    groups: HashMap<(u8, u32), Vec<u8>>,
}

impl MemoryCacheStore {
    pub fn new(prefetches: Vec<u32>) -> Self {
        Self {
            prefetches,
            groups: HashMap::new(),
        }
    }

    pub fn insert(&mut self, archive: u8, group: u32, data: Vec<u8>) {
        self.groups.insert((archive, group), data);
    }
}

impl CacheStore for MemoryCacheStore {
    fn prefetches(&self) -> &[u32] {
        &self.prefetches
    }

    async fn get_group(&self, archive: u8, group: u32, priority: Priority) -> Option<Vec<u8>> {
        let data = self.groups.get(&(archive, group)).cloned();
        if data.is_none() {
            debug!("Cache miss {}/{} ({:?})", archive, group, priority);
        }
        data
    }
}
