use std::fs;

use pluginverifier_repository::files::{
    DiskSpaceSetting, FileRepository, HashedFileNameMapper, IdentityFileNameMapper, STAGING_DIR,
};
use pluginverifier_repository::resources::{FetchError, SpaceAmount};

use crate::{FakeDownloader, write_file};

fn key(name: &str) -> String {
    name.to_owned()
}

#[tokio::test]
async fn test_download_into_repository() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let downloader = FakeDownloader::default();
    let calls = downloader.calls.clone();
    let repository = FileRepository::new(dir.path(), IdentityFileNameMapper, downloader, None)
        .unwrap();

    let lock = repository.get(&key("plugin.zip")).await.unwrap();
    assert_eq!(lock.resource(), &dir.path().join("plugin.zip"));
    assert_eq!(fs::read(lock.resource()).unwrap(), b"plugin.zip");
    assert_eq!(repository.total_space(), SpaceAmount::from_bytes(10));

    let again = repository.get(&key("plugin.zip")).await.unwrap();
    assert_eq!(again.resource(), lock.resource());
    assert_eq!(calls.get(), 1);

    // Nothing is left behind in the staging area.
    let staged = fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count();
    assert_eq!(staged, 0);
}

#[tokio::test]
async fn test_missing_download() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let repository =
        FileRepository::new(dir.path(), IdentityFileNameMapper, FakeDownloader::default(), None)
            .unwrap();

    let err = repository.get(&key("missing.zip")).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)));
    assert!(!dir.path().join("missing.zip").exists());
    assert!(!repository.has(&key("missing.zip")));
}

#[tokio::test]
async fn test_seeding_survives_restart() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    {
        let repository = FileRepository::new(
            dir.path(),
            IdentityFileNameMapper,
            FakeDownloader::default(),
            None,
        )
        .unwrap();
        repository.get(&key("a.zip")).await.unwrap();
        repository.get(&key("b.zip")).await.unwrap();
    }

    let downloader = FakeDownloader::default();
    let calls = downloader.calls.clone();
    let repository = FileRepository::new(dir.path(), IdentityFileNameMapper, downloader, None)
        .unwrap();

    let mut keys: Vec<_> = repository.get_all_existing_keys().into_iter().collect();
    keys.sort();
    assert_eq!(keys, ["a.zip", "b.zip"]);
    assert_eq!(repository.total_space(), SpaceAmount::from_bytes(10));

    let lock = repository.get(&key("a.zip")).await.unwrap();
    assert_eq!(lock.resource(), &dir.path().join("a.zip"));
    assert_eq!(calls.get(), 0);
}

#[tokio::test]
async fn test_seeding_skips_staging_and_unknown_files() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let staging = dir.path().join(STAGING_DIR);
    fs::create_dir_all(staging.join("download-abc")).unwrap();
    write_file(&staging.join("download-abc"), "partial.zip", 100);
    write_file(dir.path(), ".hidden", 100);
    write_file(dir.path(), "unrelated.txt", 100);

    let mapper = HashedFileNameMapper::new()
        .with_extension("zip")
        .with_reverse(|_| None::<String>);
    let repository = FileRepository::new(dir.path(), mapper, FakeDownloader::default(), None)
        .unwrap();

    assert!(repository.get_all_existing_keys().is_empty());
    assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    assert!(dir.path().join("unrelated.txt").exists());
}

#[tokio::test]
async fn test_disk_space_eviction() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let source = pluginverifier_test::tempdir();
    let disk_space = DiskSpaceSetting {
        max_space: SpaceAmount::from_bytes(1000),
        low_space_threshold: SpaceAmount::from_bytes(800),
    };
    let repository = FileRepository::new(
        dir.path(),
        IdentityFileNameMapper,
        FakeDownloader::default(),
        Some(disk_space),
    )
    .unwrap();

    let first = write_file(source.path(), "first.zip", 600);
    assert!(repository.add(key("first.zip"), &first).unwrap());
    assert!(!first.exists());
    assert!(dir.path().join("first.zip").exists());

    let second = write_file(source.path(), "second.zip", 600);
    assert!(repository.add(key("second.zip"), &second).unwrap());

    assert!(!dir.path().join("first.zip").exists());
    assert!(dir.path().join("second.zip").exists());
    assert_eq!(repository.total_space(), SpaceAmount::from_bytes(600));
}

#[tokio::test]
async fn test_add_existing_key_keeps_file() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let source = pluginverifier_test::tempdir();
    let repository =
        FileRepository::new(dir.path(), IdentityFileNameMapper, FakeDownloader::default(), None)
            .unwrap();

    repository.get(&key("plugin.zip")).await.unwrap();
    let duplicate = write_file(source.path(), "plugin.zip", 42);
    assert!(!repository.add(key("plugin.zip"), &duplicate).unwrap());
    assert!(duplicate.exists());
    assert_eq!(fs::read(dir.path().join("plugin.zip")).unwrap(), b"plugin.zip");
}

#[tokio::test]
async fn test_remove_and_close_delete_files() {
    pluginverifier_test::setup();

    let dir = pluginverifier_test::tempdir();
    let repository =
        FileRepository::new(dir.path(), IdentityFileNameMapper, FakeDownloader::default(), None)
            .unwrap();

    repository.get(&key("a.zip")).await.unwrap();
    let locked = repository.get(&key("b.zip")).await.unwrap();
    repository.get(&key("c.zip")).await.unwrap();

    assert!(repository.remove(&key("a.zip")));
    assert!(!dir.path().join("a.zip").exists());

    repository.close();
    assert!(!dir.path().join("c.zip").exists());
    assert!(locked.resource().exists());

    drop(locked);
    assert!(!dir.path().join("b.zip").exists());
    assert_eq!(repository.total_space(), SpaceAmount::ZERO);
}
