use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

/// Entries larger than this are refused instead of being read into memory.
pub const MAX_ENTRY_SIZE: u64 = 1 << 30;

/// Upper bound for the buffer reserved up front, the declared entry size is not trusted.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Errors when opening or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to access archive {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read archive {}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    /// The archive filesystem, or the cache it came from, was closed.
    #[error("archive is closed")]
    Closed,
}

impl ArchiveError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    fn zip(path: &Path, source: ZipError) -> Self {
        match source {
            ZipError::Io(source) => Self::io(path, source),
            source => Self::Zip {
                path: path.to_owned(),
                source,
            },
        }
    }
}

/// A read-only view into an opened ZIP or JAR file.
///
/// The underlying file stays open until [`close`](Self::close) is called, which the
/// [`ArchiveFilesystemCache`](super::ArchiveFilesystemCache) does once the archive has been idle
/// for its retention period.
pub struct ArchiveFilesystem {
    path: PathBuf,
    archive: Mutex<Option<ZipArchive<File>>>,
}

impl ArchiveFilesystem {
    /// Opens the archive at `path` and reads its central directory.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        let archive = ZipArchive::new(file).map_err(|e| ArchiveError::zip(path, e))?;
        tracing::trace!(path = %path.display(), entries = archive.len(), "Opened archive");
        Ok(Self {
            path: path.to_owned(),
            archive: Mutex::new(Some(archive)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.archive.lock().is_some()
    }

    /// Reads the entry `name`, or returns `None` if the archive has no such entry.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let mut guard = self.archive.lock();
        let archive = guard.as_mut().ok_or(ArchiveError::Closed)?;
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(ArchiveError::zip(&self.path, e)),
        };

        let declared_size = entry.size();
        read_limited(&mut entry, declared_size, MAX_ENTRY_SIZE)
            .map(Some)
            .map_err(|e| ArchiveError::io(&self.path, e))
    }

    pub fn contains(&self, name: &str) -> Result<bool, ArchiveError> {
        let guard = self.archive.lock();
        let archive = guard.as_ref().ok_or(ArchiveError::Closed)?;
        Ok(archive.index_for_name(name).is_some())
    }

    /// The names of all entries, in the order of the central directory.
    pub fn entry_names(&self) -> Result<Vec<String>, ArchiveError> {
        let guard = self.archive.lock();
        let archive = guard.as_ref().ok_or(ArchiveError::Closed)?;
        Ok(archive.file_names().map(str::to_owned).collect())
    }

    /// Closes the underlying file. Returns `false` if it was closed already.
    pub fn close(&self) -> bool {
        let closed = self.archive.lock().take().is_some();
        if closed {
            tracing::trace!(path = %self.path.display(), "Closed archive");
        }
        closed
    }
}

/// Reads `reader` to the end, failing once more than `limit` bytes come out of it.
fn read_limited(reader: impl Read, declared_size: u64, limit: u64) -> io::Result<Vec<u8>> {
    if declared_size > limit {
        return Err(entry_too_large(limit));
    }

    let mut buf = Vec::with_capacity(declared_size.min(MAX_PREALLOCATION) as usize);
    reader.take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(entry_too_large(limit));
    }
    Ok(buf)
}

fn entry_too_large(limit: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("archive entry exceeds {limit} bytes"),
    )
}

impl fmt::Debug for ArchiveFilesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveFilesystem")
            .field("path", &self.path)
            .field("is_open", &self.is_open())
            .finish()
    }
}
