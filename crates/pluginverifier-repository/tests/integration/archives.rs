use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pluginverifier_repository::archives::{ArchiveError, ArchiveFilesystemCache};
use pluginverifier_test::TempDir;

const PLUGIN_XML: &[u8] = b"<idea-plugin><id>com.example</id></idea-plugin>";

fn plugin_jar() -> (TempDir, PathBuf) {
    let dir = pluginverifier_test::tempdir();
    let path = dir.path().join("plugin.jar");
    pluginverifier_test::write_jar(
        &path,
        &[
            ("META-INF/plugin.xml", PLUGIN_XML),
            ("com/example/Action.class", &b"\xca\xfe\xba\xbe"[..]),
        ],
    );
    (dir, path)
}

fn detour(dir: &Path) -> PathBuf {
    let nested = dir.join("nested");
    std::fs::create_dir_all(&nested).unwrap();
    nested.join("..").join("plugin.jar")
}

#[tokio::test]
async fn test_zero_retention_closes_on_release() {
    pluginverifier_test::setup();

    let (_dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::ZERO);

    let filesystem = cache.acquire(&path).unwrap();
    assert_eq!(filesystem.read("META-INF/plugin.xml").unwrap().unwrap(), PLUGIN_XML);

    cache.release(&path);
    assert!(!filesystem.is_open());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_paths_are_canonicalized() {
    pluginverifier_test::setup();

    let (dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::ZERO);

    let direct = cache.acquire(&path).unwrap();
    let detoured = cache.acquire(&detour(dir.path())).unwrap();
    assert!(Arc::ptr_eq(&direct, &detoured));
    assert_eq!(cache.len(), 1);

    // Released through the other spelling.
    cache.release(&detour(dir.path()));
    assert!(direct.is_open());
    cache.release(&path);
    assert!(!direct.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_retention_keeps_idle_archive_open() {
    pluginverifier_test::setup();

    let (_dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::from_secs(30));

    let guard = cache.open(&path).unwrap();
    let filesystem = Arc::clone(guard.filesystem());
    assert!(guard.contains("com/example/Action.class").unwrap());
    drop(guard);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(filesystem.is_open());
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!filesystem.is_open());
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reacquire_cancels_pending_close() {
    pluginverifier_test::setup();

    let (_dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::from_secs(30));

    let first = cache.acquire(&path).unwrap();
    cache.release(&path);
    tokio::time::sleep(Duration::from_secs(15)).await;

    let second = cache.acquire(&path).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(second.is_open());

    cache.release(&path);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!second.is_open());
}

#[tokio::test]
async fn test_close_forces_archives_closed() {
    pluginverifier_test::setup();

    let (_dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::from_secs(30));

    let guard = cache.open(&path).unwrap();
    cache.close();
    assert!(!guard.is_open());
    assert!(matches!(guard.read("META-INF/plugin.xml"), Err(ArchiveError::Closed)));
    assert!(matches!(cache.acquire(&path), Err(ArchiveError::Closed)));

    drop(guard);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_closed_handle_is_replaced() {
    pluginverifier_test::setup();

    let (_dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::from_secs(30));

    let first = cache.acquire(&path).unwrap();
    first.close();

    let second = cache.acquire(&path).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_open());
    assert_eq!(second.entry_names().unwrap().len(), 2);

    cache.release(&path);
    cache.release(&path);
    cache.close();
    assert!(!second.is_open());
}

#[tokio::test]
async fn test_release_after_archive_was_deleted() {
    pluginverifier_test::setup();

    let (dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::ZERO);

    let direct = cache.acquire(&path).unwrap();
    let detoured = cache.acquire(&detour(dir.path())).unwrap();
    assert!(Arc::ptr_eq(&direct, &detoured));
    std::fs::remove_file(&path).unwrap();

    cache.release(&detour(dir.path()));
    assert!(direct.is_open());
    cache.release(&path);
    assert!(!direct.is_open());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_guard_releases_moved_archive() {
    pluginverifier_test::setup();

    let (dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::ZERO);

    let guard = cache.open(&path).unwrap();
    let filesystem = Arc::clone(guard.filesystem());
    std::fs::rename(&path, dir.path().join("moved.jar")).unwrap();

    drop(guard);
    assert!(!filesystem.is_open());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_missing_archive() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let cache = ArchiveFilesystemCache::new(Duration::from_secs(30));

    let err = cache.acquire(&dir.path().join("missing.jar")).unwrap_err();
    assert!(matches!(err, ArchiveError::Io { .. }));

    let broken = dir.path().join("broken.jar");
    std::fs::write(&broken, b"not a zip").unwrap();
    let err = cache.acquire(&broken).unwrap_err();
    assert!(matches!(err, ArchiveError::Zip { .. }));
    assert!(cache.is_empty());
}

#[test]
fn test_without_runtime_closes_immediately() {
    pluginverifier_test::setup();

    let (_dir, path) = plugin_jar();
    let cache = ArchiveFilesystemCache::new(Duration::from_secs(30));

    let guard = cache.open(&path).unwrap();
    let filesystem = Arc::clone(guard.filesystem());
    drop(guard);
    assert!(!filesystem.is_open());
}
