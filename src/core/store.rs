// src/core/store.rs

//! Result sinks and target stores.
//!
//! A store is addressed as `<kind>://<param>`. `memory://` keeps everything
//! in process and upserts findings, merging metadata per checker.
//! `file://<dir>` appends origins to `urls.txt` and findings to `scans.jsonl`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use strum::{Display, EnumString};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info};

use crate::core::models::{Meta, ScannedSite};
use crate::error::StoreError;

pub type UrlStream = BoxStream<'static, Result<String, StoreError>>;

/// Where successful findings go.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn insert_scan(&self, site: &ScannedSite) -> Result<(), StoreError>;
}

/// Window over a target store, in insertion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterateOptions {
    pub skip: u64,
    /// Upper bound on the number of urls yielded; `None` reads to the end.
    pub read: Option<u64>,
}

/// A persistent set of origins to scan later.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Inserts `urls`, ignoring ones already present.
    async fn insert_urls(&self, urls: &[String]) -> Result<(), StoreError>;

    async fn iterate_urls(&self, options: IterateOptions) -> Result<UrlStream, StoreError>;

    /// Number of known origins.
    async fn count_sites(&self) -> Result<u64, StoreError>;

    /// Number of stored findings.
    async fn count_records(&self) -> Result<u64, StoreError>;
}

/// A finding as kept by [`MemoryStore`]: one per `(url, checker)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredScan {
    pub url: String,
    pub checker: String,
    pub meta: Meta,
}

#[derive(Debug, Default)]
struct MemoryState {
    sites: Vec<String>,
    known: HashSet<String>,
    scans: BTreeMap<(String, String), Meta>,
}

impl MemoryState {
    fn add_site(&mut self, url: &str) {
        if self.known.insert(url.to_string()) {
            self.sites.push(url.to_string());
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every finding, ordered by url then checker.
    pub fn scans(&self) -> Vec<StoredScan> {
        let state = self.lock();
        state
            .scans
            .iter()
            .map(|((url, checker), meta)| StoredScan {
                url: url.clone(),
                checker: checker.clone(),
                meta: meta.clone(),
            })
            .collect()
    }

    pub fn sites(&self) -> Vec<String> {
        self.lock().sites.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another writer panicked mid-insert.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResultSink for MemoryStore {
    async fn insert_scan(&self, site: &ScannedSite) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.add_site(&site.url);
        let entry = state
            .scans
            .entry((site.url.clone(), site.checker.clone()))
            .or_default();
        entry.extend(site.meta.clone());
        Ok(())
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn insert_urls(&self, urls: &[String]) -> Result<(), StoreError> {
        let mut state = self.lock();
        for url in urls {
            state.add_site(url);
        }
        Ok(())
    }

    async fn iterate_urls(&self, options: IterateOptions) -> Result<UrlStream, StoreError> {
        let window = window(options);
        let urls: Vec<Result<String, StoreError>> = self
            .lock()
            .sites
            .iter()
            .skip(window.0)
            .take(window.1)
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(urls).boxed())
    }

    async fn count_sites(&self) -> Result<u64, StoreError> {
        Ok(self.lock().sites.len() as u64)
    }

    async fn count_records(&self) -> Result<u64, StoreError> {
        Ok(self.lock().scans.len() as u64)
    }
}

fn window(options: IterateOptions) -> (usize, usize) {
    let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
    let read = options
        .read
        .map(|r| usize::try_from(r).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    (skip, read)
}

const URLS_FILE: &str = "urls.txt";
const SCANS_FILE: &str = "scans.jsonl";

/// Append-only store in a directory. Urls are deduplicated within one run only.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    seen: Mutex<HashSet<String>>,
    writer: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|source| io_error(&dir, source))?;
        info!(dir = %dir.display(), "Opened file store.");
        Ok(Self {
            dir,
            seen: Mutex::new(HashSet::new()),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn urls_path(&self) -> PathBuf {
        self.dir.join(URLS_FILE)
    }

    pub fn scans_path(&self) -> PathBuf {
        self.dir.join(SCANS_FILE)
    }

    async fn append(&self, path: &Path, payload: &str) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| io_error(path, source))?;
        file.write_all(payload.as_bytes())
            .await
            .map_err(|source| io_error(path, source))?;
        file.flush().await.map_err(|source| io_error(path, source))
    }

    async fn lines(&self, path: PathBuf) -> Result<UrlStream, StoreError> {
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(stream::empty().boxed()),
            Err(source) => return Err(io_error(&path, source)),
        };
        let lines = FramedRead::new(file, LinesCodec::new())
            .map_err(move |err| StoreError::Io {
                path: path.display().to_string(),
                source: std::io::Error::other(err),
            })
            .try_filter(|line| futures::future::ready(!line.trim().is_empty()));
        Ok(lines.boxed())
    }

    async fn count_lines(&self, path: PathBuf) -> Result<u64, StoreError> {
        let mut lines = self.lines(path).await?;
        let mut count = 0u64;
        while let Some(line) = lines.next().await {
            line?;
            count += 1;
        }
        Ok(count)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ResultSink for FileStore {
    async fn insert_scan(&self, site: &ScannedSite) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(site)?;
        line.push('\n');
        self.append(&self.scans_path(), &line).await
    }
}

#[async_trait]
impl TargetStore for FileStore {
    async fn insert_urls(&self, urls: &[String]) -> Result<(), StoreError> {
        let fresh: Vec<&String> = {
            let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            urls.iter().filter(|url| seen.insert((*url).clone())).collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }
        let mut payload = String::new();
        for url in fresh {
            payload.push_str(url);
            payload.push('\n');
        }
        self.append(&self.urls_path(), &payload).await
    }

    async fn iterate_urls(&self, options: IterateOptions) -> Result<UrlStream, StoreError> {
        let (skip, read) = window(options);
        Ok(self.lines(self.urls_path()).await?.skip(skip).take(read).boxed())
    }

    async fn count_sites(&self) -> Result<u64, StoreError> {
        self.count_lines(self.urls_path()).await
    }

    async fn count_records(&self) -> Result<u64, StoreError> {
        self.count_lines(self.scans_path()).await
    }
}

/// An opened store, usable as a sink, as a target store, or both.
#[derive(Clone)]
pub struct OpenStore {
    pub uri: String,
    pub sink: Arc<dyn ResultSink>,
    pub targets: Arc<dyn TargetStore>,
}

impl std::fmt::Debug for OpenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStore").field("uri", &self.uri).finish()
    }
}

/// Store backends addressable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

/// Opens the store addressed by `uri`. Unknown kinds are an error.
pub async fn open_store(uri: &str) -> Result<OpenStore, StoreError> {
    let (kind, param) = uri
        .split_once("://")
        .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))?;
    let kind: StoreKind = kind
        .parse()
        .map_err(|_| StoreError::UnknownStore(kind.to_string()))?;
    debug!(%kind, uri, "Opening store.");
    match kind {
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok(OpenStore {
                uri: uri.to_string(),
                sink: store.clone(),
                targets: store,
            })
        }
        StoreKind::File => {
            if param.is_empty() {
                return Err(StoreError::InvalidUri(uri.to_string()));
            }
            let store = Arc::new(FileStore::open(param).await?);
            Ok(OpenStore {
                uri: uri.to_string(),
                sink: store.clone(),
                targets: store,
            })
        }
    }
}

/// Opens every uri, failing on the first bad one.
pub async fn open_stores(uris: &[String]) -> Result<Vec<OpenStore>, StoreError> {
    let mut stores = Vec::with_capacity(uris.len());
    for uri in uris {
        stores.push(open_store(uri).await?);
    }
    Ok(stores)
}

pub const DEFAULT_URL_BATCH: usize = 500;

/// Accumulates origins and inserts them into target stores in fixed-size batches.
pub struct UrlBatch {
    size: usize,
    items: Vec<String>,
    stores: Vec<Arc<dyn TargetStore>>,
    inserted: u64,
}

impl UrlBatch {
    pub fn new(size: usize, stores: Vec<Arc<dyn TargetStore>>) -> Self {
        Self {
            size: size.max(1),
            items: Vec::new(),
            stores,
            inserted: 0,
        }
    }

    pub async fn add(&mut self, urls: Vec<String>) {
        self.items.extend(urls);
        if self.items.len() >= self.size {
            self.flush().await;
        }
    }

    /// Inserts whatever is pending into every store. A failing store is logged.
    pub async fn flush(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.items);
        let inserts = self.stores.iter().map(|store| store.insert_urls(&batch));
        for result in join_all(inserts).await {
            if let Err(err) = result {
                error!(error = %err, urls = batch.len(), "Failed to insert url batch.");
            }
        }
        self.inserted += batch.len() as u64;
        debug!(urls = batch.len(), total = self.inserted, "Url batch flushed.");
    }

    /// Flushes the tail and returns how many urls were handed to the stores.
    pub async fn finish(&mut self) -> u64 {
        self.flush().await;
        self.inserted
    }

    pub fn pending(&self) -> usize {
        self.items.len()
    }
}
