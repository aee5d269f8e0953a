use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use pluginverifier_repository::files::{DiskSpaceSetting, IdentityFileNameMapper, scan_directory};
use pluginverifier_repository::resources::{
    ProvideResult, ResourceProvider, ResourceRepository, SpaceAmount,
};
use pluginverifier_repository::utils::fs::{remove_path, size_on_disk};

use crate::output::{self, CleanupSummary, StatusEntry};

/// Refuses to fetch anything, cachectl only works with files already on disk.
struct Offline;

impl ResourceProvider<String, PathBuf> for Offline {
    fn provide<'a>(&'a self, _key: &'a String) -> BoxFuture<'a, ProvideResult<PathBuf>> {
        Box::pin(async { ProvideResult::NotFound("cachectl does not download files".into()) })
    }
}

fn scan(dir: &Path) -> Result<Vec<StatusEntry>> {
    let files = scan_directory(dir, &IdentityFileNameMapper)
        .with_context(|| format!("failed to list {}", dir.display()))?;

    let mut entries = Vec::with_capacity(files.len());
    for (name, path, _) in files {
        let size = size_on_disk(&path)
            .with_context(|| format!("failed to determine size of {}", path.display()))?;
        let modified = fs::metadata(&path).and_then(|metadata| metadata.modified())?;
        entries.push(StatusEntry {
            name,
            size: SpaceAmount::from_bytes(size),
            modified,
        });
    }
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

pub fn status(dir: &Path) -> Result<()> {
    let entries = scan(dir)?;
    output::status_table(&entries).printstd();
    Ok(())
}

pub fn cleanup(dir: &Path, disk_space: DiskSpaceSetting, dry_run: bool) -> Result<()> {
    let entries = scan(dir)?;
    let sizes: HashMap<&str, SpaceAmount> = entries
        .iter()
        .map(|entry| (entry.name.as_str(), entry.size))
        .collect();
    let total_before = entries
        .iter()
        .fold(SpaceAmount::ZERO, |total, entry| total + entry.size);

    let mut deleted = sweep(dir, disk_space, dry_run)?;
    deleted.sort();

    let deleted: Vec<(String, SpaceAmount)> = deleted
        .into_iter()
        .map(|name| {
            let size = sizes.get(name.as_str()).copied().unwrap_or_default();
            (name, size)
        })
        .collect();

    let summary = CleanupSummary {
        dry_run,
        disk_space,
        total_before,
        deleted,
    };
    if !summary.deleted.is_empty() {
        output::cleanup_table(&summary).printstd();
    }
    println!("{summary}");
    Ok(())
}

/// Sweeps the files in `dir` down to the low space threshold, least recently used first.
///
/// Only the files themselves are considered. The staging directory of a verifier that is
/// downloading into `dir` at the same time is left alone. Returns the names of the deleted
/// files, or of those that would be deleted in a dry run.
fn sweep(dir: &Path, disk_space: DiskSpaceSetting, dry_run: bool) -> Result<Vec<String>> {
    let files = scan_directory(dir, &IdentityFileNameMapper)
        .with_context(|| format!("failed to list {}", dir.display()))?;
    let before: HashSet<String> = files.iter().map(|(name, _, _)| name.clone()).collect();

    let builder = ResourceRepository::builder(|path: &PathBuf| {
        SpaceAmount::from_bytes(size_on_disk(path).unwrap_or_default())
    })
    .name("cachectl")
    .sweep_policy(disk_space.sweep_policy());
    let repository = if dry_run {
        builder.build(Offline)
    } else {
        builder
            .disposer(|_: &String, path: PathBuf| {
                tracing::debug!(path = %path.display(), "Deleting file");
                remove_path(&path).with_context(|| format!("deleting {}", path.display()))
            })
            .build(Offline)
    };

    // Preloading sweeps once all files are known.
    repository.preload(files);
    let after = repository.get_all_existing_keys();
    if !dry_run {
        tracing::info!(
            path = %dir.display(),
            total = %repository.total_weight(),
            "Cleaned up repository"
        );
    }
    Ok(before.difference(&after).cloned().collect())
}
