//! Small filesystem helpers shared by the file repository and its tooling.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use walkdir::WalkDir;

/// Runs `f`, mapping an [`io::ErrorKind::NotFound`] error to `Ok(None)`.
pub fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}

/// Returns the size in bytes of a file, or the recursive size of all files in a directory.
pub fn size_on_disk(path: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Deletes a file or a whole directory tree.
///
/// A path that does not exist anymore is not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let Some(metadata) = catch_not_found(|| fs::symlink_metadata(path))? else {
        return Ok(());
    };
    catch_not_found(|| {
        if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    })?;
    Ok(())
}

/// Moves a file or directory, falling back to copy-and-delete across filesystems.
pub fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_recursive(from, to)?;
            remove_path(from)
        }
        Err(e) => Err(e),
    }
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if !from.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }

    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Bumps the `mtime` of `path` to now if it was last modified more than `every` ago.
///
/// Returns whether the file was touched.
pub fn touch_if_older_than(path: &Path, every: Duration) -> io::Result<bool> {
    let mtime = fs::metadata(path)?.modified()?;
    let elapsed = SystemTime::now()
        .duration_since(mtime)
        .unwrap_or_default();
    if elapsed < every {
        return Ok(false);
    }
    filetime::set_file_mtime(path, FileTime::now())?;
    Ok(true)
}
