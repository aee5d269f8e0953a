use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{ArchiveError, ArchiveFilesystem};

type Cell = Arc<OnceCell<Arc<ArchiveFilesystem>>>;

struct Slot {
    /// Filled once by whoever opens the archive first; concurrent acquirers block on it.
    filesystem: Cell,
    holders: usize,
    close_timer: Option<CancellationToken>,
}

impl Slot {
    fn new() -> Self {
        Self {
            filesystem: Cell::default(),
            holders: 0,
            close_timer: None,
        }
    }
}

#[derive(Default)]
struct State {
    slots: HashMap<PathBuf, Slot>,
    /// Absolute paths that archives were requested by, mapped to their canonical path.
    ///
    /// Lets `release` find the slot after the archive was moved or deleted.
    aliases: HashMap<PathBuf, PathBuf>,
    is_closed: bool,
}

impl State {
    fn remove_slot(&mut self, path: &Path) -> Option<Slot> {
        let slot = self.slots.remove(path)?;
        self.aliases.retain(|_, canonical| canonical != path);
        Some(slot)
    }

    /// Finds the slot of an archive that can no longer be canonicalized.
    fn resolve(&self, requested: &Path) -> Option<PathBuf> {
        let absolute = std::path::absolute(requested).ok()?;
        if self.slots.contains_key(&absolute) {
            return Some(absolute);
        }
        self.aliases.get(&absolute).cloned()
    }
}

struct Inner {
    retention: Duration,
    runtime: Option<Handle>,
    state: Mutex<State>,
}

impl Inner {
    fn acquire(
        self: &Arc<Self>,
        path: PathBuf,
        requested: &Path,
    ) -> Result<Arc<ArchiveFilesystem>, ArchiveError> {
        let cell = {
            let mut state = self.state.lock();
            if state.is_closed {
                return Err(ArchiveError::Closed);
            }

            if let Ok(absolute) = std::path::absolute(requested) {
                if absolute != path {
                    state.aliases.insert(absolute, path.clone());
                }
            }

            let slot = state.slots.entry(path.clone()).or_insert_with(Slot::new);
            if slot.filesystem.get().is_some_and(|fs| !fs.is_open()) {
                tracing::debug!(path = %path.display(), "Reopening closed archive");
                slot.filesystem = Cell::default();
            }
            if let Some(timer) = slot.close_timer.take() {
                timer.cancel();
            }
            slot.holders += 1;
            Arc::clone(&slot.filesystem)
        };

        let mut opened = false;
        let result = cell.get_or_try_init(|| {
            opened = true;
            ArchiveFilesystem::open(&path).map(Arc::new)
        });

        let filesystem = match result {
            Ok(filesystem) => Arc::clone(filesystem),
            Err(err) => {
                self.release(&path);
                return Err(err);
            }
        };

        if opened {
            metric!(counter("archives.open") += 1);
            // `close` may have run while the archive was being opened.
            if self.state.lock().is_closed {
                filesystem.close();
                return Err(ArchiveError::Closed);
            }
        } else {
            metric!(counter("archives.reuse") += 1);
        }
        Ok(filesystem)
    }

    fn release(self: &Arc<Self>, path: &Path) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.is_closed {
            return;
        }
        let Some(slot) = state.slots.get_mut(path) else {
            tracing::warn!(path = %path.display(), "Released archive that is not held");
            return;
        };
        if slot.holders == 0 {
            tracing::warn!(path = %path.display(), "Released archive more often than acquired");
            return;
        }

        slot.holders -= 1;
        if slot.holders > 0 {
            return;
        }

        let runtime = match &self.runtime {
            Some(runtime) if !self.retention.is_zero() && slot.filesystem.get().is_some() => {
                runtime
            }
            _ => {
                let slot = state.remove_slot(path);
                drop(guard);
                if let Some(filesystem) = slot.and_then(|slot| slot.filesystem.get().cloned()) {
                    close_filesystem(&filesystem);
                }
                return;
            }
        };

        let token = CancellationToken::new();
        slot.close_timer = Some(token.clone());
        let inner = Arc::clone(self);
        let path = path.to_owned();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(inner.retention) => inner.close_idle(&path, &token),
            }
        });
    }

    /// Closes the archive at `path` if nobody acquired it since `token` was handed out.
    fn close_idle(&self, path: &Path, token: &CancellationToken) {
        let slot = {
            let mut state = self.state.lock();
            let is_idle = state
                .slots
                .get(path)
                .is_some_and(|slot| slot.holders == 0 && !token.is_cancelled());
            if !is_idle {
                return;
            }
            state.remove_slot(path)
        };

        tracing::debug!(path = %path.display(), "Closing idle archive");
        if let Some(filesystem) = slot.and_then(|slot| slot.filesystem.get().cloned()) {
            close_filesystem(&filesystem);
        }
    }

    fn close(&self) {
        let slots = {
            let mut state = self.state.lock();
            if state.is_closed {
                return;
            }
            state.is_closed = true;
            state.aliases.clear();
            std::mem::take(&mut state.slots)
        };

        tracing::debug!(archives = slots.len(), "Closing archive cache");
        for (_, slot) in slots {
            if let Some(timer) = slot.close_timer {
                timer.cancel();
            }
            if let Some(filesystem) = slot.filesystem.get() {
                close_filesystem(filesystem);
            }
        }
    }
}

fn close_filesystem(filesystem: &ArchiveFilesystem) {
    if filesystem.close() {
        metric!(counter("archives.close") += 1);
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, ArchiveError> {
    path.canonicalize().map_err(|source| ArchiveError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Opened ZIP/JAR filesystems, shared between all users of the same archive.
///
/// Archives are keyed by their canonical path, so `a/../plugin.jar` and `plugin.jar` share one
/// filesystem. Once the last holder releases an archive, it stays open for the retention period
/// and is closed afterwards unless somebody acquires it again in the meantime.
///
/// The cache can be used from any thread. Delayed closing needs a tokio runtime, which is
/// captured when the cache is created. Without one, or with a zero retention, archives are closed
/// as soon as they are released.
#[derive(Clone)]
pub struct ArchiveFilesystemCache {
    inner: Arc<Inner>,
}

impl ArchiveFilesystemCache {
    pub fn new(retention: Duration) -> Self {
        Self::with_runtime(retention, Handle::try_current().ok())
    }

    /// Creates a cache that runs its close timers on `runtime`.
    pub fn with_runtime(retention: Duration, runtime: Option<Handle>) -> Self {
        if runtime.is_none() && !retention.is_zero() {
            tracing::debug!("No async runtime available, archives are closed without retention");
        }
        Self {
            inner: Arc::new(Inner {
                retention,
                runtime,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn retention(&self) -> Duration {
        self.inner.retention
    }

    /// Returns the filesystem for the archive at `path`, opening it if necessary.
    ///
    /// Every successful call must be paired with a [`release`](Self::release) of the same
    /// archive. Prefer [`open`](Self::open), which does that automatically.
    pub fn acquire(&self, path: &Path) -> Result<Arc<ArchiveFilesystem>, ArchiveError> {
        self.inner.acquire(canonicalize(path)?, path)
    }

    /// Gives back an archive obtained through [`acquire`](Self::acquire).
    ///
    /// The archive may have been moved or deleted in the meantime, it is then found by the path
    /// it was acquired with.
    pub fn release(&self, path: &Path) {
        match canonicalize(path) {
            Ok(path) => self.inner.release(&path),
            Err(e) => {
                let resolved = self.inner.state.lock().resolve(path);
                match resolved {
                    Some(path) => self.inner.release(&path),
                    None => {
                        let stderr: &dyn std::error::Error = &e;
                        tracing::warn!(error = stderr, "Failed to release archive");
                    }
                }
            }
        }
    }

    /// Acquires the archive at `path` for the lifetime of the returned guard.
    pub fn open(&self, path: &Path) -> Result<ArchiveGuard, ArchiveError> {
        let canonical = canonicalize(path)?;
        let filesystem = self.inner.acquire(canonical.clone(), path)?;
        Ok(ArchiveGuard {
            inner: Arc::clone(&self.inner),
            path: canonical,
            filesystem,
        })
    }

    /// The number of archives that are open or being opened.
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every archive, even those still in use, and refuses further acquisitions.
    pub fn close(&self) {
        self.inner.close()
    }
}

impl fmt::Debug for ArchiveFilesystemCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ArchiveFilesystemCache")
            .field("retention", &self.inner.retention)
            .field("archives", &state.slots.len())
            .field("is_closed", &state.is_closed)
            .finish()
    }
}

/// An acquired archive, released when dropped.
pub struct ArchiveGuard {
    inner: Arc<Inner>,
    path: PathBuf,
    filesystem: Arc<ArchiveFilesystem>,
}

impl ArchiveGuard {
    pub fn filesystem(&self) -> &Arc<ArchiveFilesystem> {
        &self.filesystem
    }
}

impl Deref for ArchiveGuard {
    type Target = ArchiveFilesystem;

    fn deref(&self) -> &ArchiveFilesystem {
        &self.filesystem
    }
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        self.inner.release(&self.path);
    }
}

impl fmt::Debug for ArchiveGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveGuard")
            .field("filesystem", &self.filesystem)
            .finish()
    }
}
