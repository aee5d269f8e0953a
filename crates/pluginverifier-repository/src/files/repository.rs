use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::FileNameMapper;
use crate::resources::{
    AvailableResource, CapacitySweepPolicy, FetchResult, ProvideResult, ResourceKey,
    ResourceLock, ResourceProvider, ResourceRepository, SpaceAmount,
};
use crate::utils::fs::{move_path, remove_path, size_on_disk, touch_if_older_than};

/// The directory below the repository root that receives in-progress downloads.
pub const STAGING_DIR: &str = ".downloads";

/// How often the `mtime` of a file in use is bumped.
///
/// Tools that clean up old files based on their `mtime` then see the file as in use.
pub const TOUCH_EVERY: Duration = Duration::from_secs(3600);

/// A lock on a file inside a [`FileRepository`].
pub type FileLock<K> = ResourceLock<K, PathBuf, SpaceAmount>;

/// Bounds the disk usage of a [`FileRepository`].
///
/// Once the files take more than `max_space`, the least recently used ones are deleted until
/// the total drops to `low_space_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpaceSetting {
    pub max_space: SpaceAmount,
    pub low_space_threshold: SpaceAmount,
}

impl DiskSpaceSetting {
    /// Sweeps down to 80% of `max_space`.
    pub fn new(max_space: SpaceAmount) -> Self {
        Self {
            max_space,
            low_space_threshold: max_space.fraction(0.8),
        }
    }

    /// The policy a [`FileRepository`] with this setting sweeps with.
    pub fn sweep_policy(self) -> CapacitySweepPolicy<SpaceAmount> {
        CapacitySweepPolicy::new(self.max_space).with_target(self.low_space_threshold)
    }
}

/// The outcome of a [`FileDownloader::download`] call.
#[derive(Debug)]
pub enum DownloadResult {
    /// The file or directory at this path is ready to be moved into the repository.
    Downloaded(PathBuf),
    NotFound(String),
    Failed(String, anyhow::Error),
}

/// Fetches files that are missing from a [`FileRepository`].
pub trait FileDownloader<K>: Send + Sync + 'static {
    /// Downloads the file for `key`.
    ///
    /// `staging_dir` is a fresh directory exclusive to this download. It is deleted afterwards,
    /// along with anything left in it.
    fn download<'a>(&'a self, key: &'a K, staging_dir: &'a Path) -> BoxFuture<'a, DownloadResult>;
}

/// Adapts a [`FileDownloader`] to the repository: stages the download and moves the result
/// into place.
struct DownloadProvider<K> {
    dir: PathBuf,
    staging: PathBuf,
    mapper: Arc<dyn FileNameMapper<K>>,
    downloader: Box<dyn FileDownloader<K>>,
}

impl<K: ResourceKey> DownloadProvider<K> {
    async fn download(&self, key: &K) -> ProvideResult<PathBuf> {
        let staging_dir = match tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&self.staging)
        {
            Ok(dir) => dir,
            Err(e) => {
                return ProvideResult::Failed(
                    "failed to create staging directory".into(),
                    anyhow::Error::new(e).context(self.staging.display().to_string()),
                );
            }
        };

        let downloaded = match self.downloader.download(key, staging_dir.path()).await {
            DownloadResult::Downloaded(path) => path,
            DownloadResult::NotFound(reason) => return ProvideResult::NotFound(reason),
            DownloadResult::Failed(reason, error) => return ProvideResult::Failed(reason, error),
        };

        let target = self.dir.join(self.mapper.file_name(key));
        let moved = remove_path(&target).and_then(|()| move_path(&downloaded, &target));
        match moved {
            Ok(()) => ProvideResult::Provided(target),
            Err(e) => ProvideResult::Failed(
                "failed to move download into the repository".into(),
                anyhow::Error::new(e).context(target.display().to_string()),
            ),
        }
    }
}

impl<K: ResourceKey> ResourceProvider<K, PathBuf> for DownloadProvider<K> {
    fn provide<'a>(&'a self, key: &'a K) -> BoxFuture<'a, ProvideResult<PathBuf>> {
        Box::pin(self.download(key))
    }
}

/// A [`ResourceRepository`] of files and directories inside one directory on disk.
///
/// Entries are weighed by their size on disk and deleted when evicted or removed. Files that
/// already exist when the repository is created are registered without downloading them again.
pub struct FileRepository<K: ResourceKey> {
    dir: PathBuf,
    mapper: Arc<dyn FileNameMapper<K>>,
    repository: ResourceRepository<K, PathBuf, SpaceAmount>,
}

impl<K: ResourceKey> FileRepository<K> {
    /// Creates a repository in `dir`, creating the directory if necessary.
    ///
    /// Leftovers of interrupted downloads are deleted, and existing files whose names `mapper`
    /// resolves to a key are registered. Without a `disk_space` setting, files are only deleted
    /// explicitly.
    pub fn new(
        dir: impl Into<PathBuf>,
        mapper: impl FileNameMapper<K>,
        downloader: impl FileDownloader<K>,
        disk_space: Option<DiskSpaceSetting>,
    ) -> io::Result<Self> {
        let dir = dir.into();
        let staging = dir.join(STAGING_DIR);
        remove_path(&staging)?;
        fs::create_dir_all(&staging)?;

        let mapper: Arc<dyn FileNameMapper<K>> = Arc::new(mapper);
        let provider = DownloadProvider {
            dir: dir.clone(),
            staging,
            mapper: Arc::clone(&mapper),
            downloader: Box::new(downloader),
        };

        let builder = ResourceRepository::builder(|path: &PathBuf| weigh_file(path))
            .name(dir.display().to_string())
            .disposer(|_: &K, path: PathBuf| {
                tracing::debug!(path = %path.display(), "Deleting file");
                remove_path(&path).with_context(|| format!("deleting {}", path.display()))
            });
        let repository = match disk_space {
            Some(disk_space) => builder.sweep_policy(disk_space.sweep_policy()),
            None => builder,
        }
        .build(provider);

        let this = Self {
            dir,
            mapper,
            repository,
        };
        let seeded = this.seed()?;
        tracing::info!(
            path = %this.dir.display(),
            files = seeded,
            total = %this.total_space(),
            "Opened file repository"
        );
        Ok(this)
    }

    /// Registers the files already present in the repository directory.
    fn seed(&self) -> io::Result<usize> {
        let existing = scan_directory(&self.dir, &*self.mapper)?;
        Ok(self.repository.preload(existing))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path a file for `key` is stored at, whether it exists or not.
    pub fn path_for(&self, key: &K) -> PathBuf {
        self.dir.join(self.mapper.file_name(key))
    }

    /// Returns a lock on the file for `key`, downloading it if necessary.
    pub async fn get(&self, key: &K) -> FetchResult<K, PathBuf, SpaceAmount> {
        let lock = self.repository.get(key).await?;
        touch(lock.resource());
        Ok(lock)
    }

    /// Like [`get`](Self::get), but gives up once `token` is cancelled.
    pub async fn get_cancellable(
        &self,
        key: &K,
        token: &CancellationToken,
    ) -> FetchResult<K, PathBuf, SpaceAmount> {
        let lock = self.repository.get_cancellable(key, token).await?;
        touch(lock.resource());
        Ok(lock)
    }

    /// Registers a file that was produced without the downloader.
    ///
    /// The file is moved into the repository directory unless it is already there. Returns
    /// `false`, leaving the file where it is, if `key` is already present or being downloaded.
    pub fn add(&self, key: K, path: &Path) -> io::Result<bool> {
        let target = self.path_for(&key);
        self.repository.try_add_with(key, || -> io::Result<PathBuf> {
            if path != target {
                remove_path(&target)?;
                move_path(path, &target)?;
            }
            Ok(target)
        })
    }

    pub fn remove(&self, key: &K) -> bool {
        self.repository.remove(key)
    }

    pub fn remove_all(&self) {
        self.repository.remove_all()
    }

    pub fn has(&self, key: &K) -> bool {
        self.repository.has(key)
    }

    pub fn get_all_existing_keys(&self) -> HashSet<K> {
        self.repository.get_all_existing_keys()
    }

    pub fn get_available_resources(&self) -> Vec<AvailableResource<K, SpaceAmount>> {
        self.repository.get_available_resources()
    }

    /// The disk space taken by all registered files.
    pub fn total_space(&self) -> SpaceAmount {
        self.repository.total_weight()
    }

    pub fn cleanup(&self) -> usize {
        self.repository.cleanup()
    }

    /// Closes the repository, deleting all files that are not locked.
    pub fn close(&self) {
        self.repository.close()
    }
}

impl<K: ResourceKey> fmt::Debug for FileRepository<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRepository")
            .field("dir", &self.dir)
            .field("repository", &self.repository)
            .finish()
    }
}

/// Lists the files in `dir` that `mapper` recognizes, along with their last access time.
///
/// The last access time is derived from the `mtime`, which [`FileRepository::get`] bumps
/// regularly. Hidden files, like the staging directory, are skipped.
pub fn scan_directory<K: 'static>(
    dir: &Path,
    mapper: &dyn FileNameMapper<K>,
) -> io::Result<Vec<(K, PathBuf, Instant)>> {
    let now = Instant::now();
    let system_now = SystemTime::now();

    let mut existing = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        let Some(key) = mapper.key(file_name) else {
            tracing::debug!(file_name, "Skipping unknown file");
            continue;
        };

        let last_access_time = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|mtime| system_now.duration_since(mtime).ok())
            .and_then(|age| now.checked_sub(age))
            .unwrap_or(now);
        existing.push((key, entry.path(), last_access_time));
    }
    Ok(existing)
}

fn weigh_file(path: &Path) -> SpaceAmount {
    match size_on_disk(path) {
        Ok(bytes) => SpaceAmount::from_bytes(bytes),
        Err(e) => {
            let stderr: &dyn std::error::Error = &e;
            tracing::warn!(path = %path.display(), error = stderr, "Failed to determine file size");
            SpaceAmount::ZERO
        }
    }
}

fn touch(path: &Path) {
    if let Err(e) = touch_if_older_than(path, TOUCH_EVERY) {
        let stderr: &dyn std::error::Error = &e;
        tracing::debug!(path = %path.display(), error = stderr, "Failed to touch file");
    }
}
