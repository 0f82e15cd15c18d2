//! Loadable, memory- or file-backed copies of a game document.
//!
//! A [`ResourceHost`] turns document text into something an isolated frame can
//! load. Every materialized resource is owned by exactly one
//! [`ResourceHandle`], which releases it once: explicitly, or on drop.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use url::Url;

use crate::error_codes::{CodedError, RESOURCE_MATERIALIZATION_FAILED};

const BLOB_URL_PREFIX: &str = "blob:vibevault/";
const GENERATION_FRAGMENT: &str = "vv";

/// A materialized document. `generation` increases on every restart so the
/// load target changes even when the bytes do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub url: String,
    pub generation: u64,
}

impl ResourceRef {
    /// URL handed to the frame, carrying the generation as a fragment token.
    pub fn load_target(&self) -> String {
        format!("{}#{}={}", self.url, GENERATION_FRAGMENT, self.generation)
    }
}

#[async_trait]
pub trait ResourceHost: Send + Sync {
    async fn materialize(&self, html: &str, generation: u64) -> Result<ResourceRef>;

    fn release(&self, resource: &ResourceRef) -> Result<()>;
}

/// Exclusive owner of one materialized resource.
pub struct ResourceHandle {
    resource: ResourceRef,
    host: Arc<dyn ResourceHost>,
    released: bool,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("resource", &self.resource)
            .field("released", &self.released)
            .finish()
    }
}

impl ResourceHandle {
    pub fn new(resource: ResourceRef, host: Arc<dyn ResourceHost>) -> Self {
        Self {
            resource,
            host,
            released: false,
        }
    }

    /// Materializes `html` through `host` and wraps the result.
    pub async fn acquire(host: Arc<dyn ResourceHost>, html: &str, generation: u64) -> Result<Self> {
        let resource = host.materialize(html, generation).await?;
        Ok(Self::new(resource, host))
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Returns `false` when the handle was already released. Host failures are
    /// logged; the handle counts as released either way.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        if let Err(error) = self.host.release(&self.resource) {
            tracing::warn!(url = %self.resource.url, "failed to release resource: {error:#}");
        } else {
            tracing::debug!(url = %self.resource.url, "released resource");
        }
        true
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Default)]
struct MemoryHostState {
    live: BTreeMap<String, String>,
    created: usize,
    released: usize,
    pending: usize,
    fail_next: bool,
}

/// Blob-style in-memory host. Counts every create and release, can hold
/// materialization in flight until [`MemoryResourceHost::resume`], and can be
/// told to fail the next materialization.
#[derive(Debug)]
pub struct MemoryResourceHost {
    state: Mutex<MemoryHostState>,
    hold: watch::Sender<bool>,
}

impl Default for MemoryResourceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResourceHost {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Mutex::new(MemoryHostState::default()),
            hold,
        }
    }

    /// Materializations started after this call wait until `resume`.
    pub fn pause(&self) {
        self.hold.send_replace(true);
    }

    pub fn resume(&self) {
        self.hold.send_replace(false);
    }

    pub fn fail_next_materialization(&self) {
        self.lock().fail_next = true;
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    pub fn created_count(&self) -> usize {
        self.lock().created
    }

    pub fn released_count(&self) -> usize {
        self.lock().released
    }

    /// Materializations currently waiting on a pause.
    pub fn pending_count(&self) -> usize {
        self.lock().pending
    }

    pub fn content_of(&self, url: &str) -> Option<String> {
        self.lock().live.get(url).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryHostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResourceHost for MemoryResourceHost {
    async fn materialize(&self, html: &str, generation: u64) -> Result<ResourceRef> {
        let mut held = self.hold.subscribe();
        if *held.borrow() {
            self.lock().pending += 1;
            let waited = held.wait_for(|paused| !*paused).await.map(|_| ());
            self.lock().pending -= 1;
            waited.context("resource host shut down while materializing")?;
        }

        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next) {
            return Err(anyhow!(CodedError::platform(
                RESOURCE_MATERIALIZATION_FAILED,
                "in-memory host refused to create a document resource"
            )));
        }
        let url = format!("{BLOB_URL_PREFIX}{}", uuid::Uuid::new_v4());
        state.live.insert(url.clone(), html.to_owned());
        state.created += 1;
        Ok(ResourceRef { url, generation })
    }

    fn release(&self, resource: &ResourceRef) -> Result<()> {
        let mut state = self.lock();
        if state.live.remove(&resource.url).is_none() {
            bail!("unknown or already released resource {}", resource.url);
        }
        state.released += 1;
        Ok(())
    }
}

/// Writes each document to `<root>/<sha256 prefix>-<seq>.html` and hands out a
/// `file://` URL. Release deletes the file; paths outside the root are refused.
#[derive(Debug)]
pub struct FileResourceHost {
    root: PathBuf,
    next_seq: AtomicU64,
}

impl FileResourceHost {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create resource cache {}", root.display()))?;
        let root = fs::canonicalize(root).with_context(|| {
            format!("failed to canonicalize resource cache {}", root.display())
        })?;
        Ok(Self {
            root,
            next_seq: AtomicU64::new(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn confined_path(&self, resource: &ResourceRef) -> Result<PathBuf> {
        let url = Url::parse(&resource.url)
            .with_context(|| format!("invalid resource url {}", resource.url))?;
        let path = url
            .to_file_path()
            .map_err(|()| anyhow!("resource url is not a local file: {}", resource.url))?;
        let parent = path
            .parent()
            .map(fs::canonicalize)
            .transpose()
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        if parent.as_deref() != Some(self.root.as_path()) {
            bail!(
                "resource path outside cache root: blocked release of {}",
                path.display()
            );
        }
        Ok(path)
    }
}

#[async_trait]
impl ResourceHost for FileResourceHost {
    async fn materialize(&self, html: &str, generation: u64) -> Result<ResourceRef> {
        let digest = format!("{:x}", Sha256::digest(html.as_bytes()));
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let path = self.root.join(format!("{}-{seq}.html", &digest[..16]));
        fs::write(&path, html).map_err(|error| {
            anyhow!(CodedError::platform(
                RESOURCE_MATERIALIZATION_FAILED,
                format!("failed to write {}: {error}", path.display())
            ))
        })?;
        let url = Url::from_file_path(&path)
            .map_err(|()| anyhow!("cache path is not absolute: {}", path.display()))?;
        Ok(ResourceRef {
            url: url.to_string(),
            generation,
        })
    }

    fn release(&self, resource: &ResourceRef) -> Result<()> {
        let path = self.confined_path(resource)?;
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        Ok(())
    }
}
