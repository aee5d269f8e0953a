use std::fmt;
use std::time::SystemTime;

use pluginverifier_repository::files::DiskSpaceSetting;
use pluginverifier_repository::resources::SpaceAmount;
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};

/// A file in a repository directory.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub name: String,
    pub size: SpaceAmount,
    pub modified: SystemTime,
}

pub fn status_table(entries: &[StatusEntry]) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b->"Name", br->"Size", b->"Last used"]);

    let mut total = SpaceAmount::ZERO;
    for entry in entries {
        total = total + entry.size;
        table.add_row(row![
            entry.name,
            r->entry.size,
            humantime::format_rfc3339_seconds(entry.modified)
        ]);
    }

    table.add_empty_row();
    table.add_row(row![b->format!("{} files", entries.len()), br->total, ""]);
    table
}

/// What a cleanup deleted, or would delete in a dry run.
#[derive(Debug)]
pub struct CleanupSummary {
    pub dry_run: bool,
    pub disk_space: DiskSpaceSetting,
    pub total_before: SpaceAmount,
    pub deleted: Vec<(String, SpaceAmount)>,
}

impl CleanupSummary {
    pub fn freed(&self) -> SpaceAmount {
        self.deleted
            .iter()
            .fold(SpaceAmount::ZERO, |total, (_, size)| total + *size)
    }
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "Would delete" } else { "Deleted" };
        write!(
            f,
            "{verb} {} files ({}), {} of {} used (limit {}, cleaning down to {})",
            self.deleted.len(),
            self.freed(),
            self.total_before - self.freed(),
            self.total_before,
            self.disk_space.max_space,
            self.disk_space.low_space_threshold,
        )
    }
}

pub fn cleanup_table(summary: &CleanupSummary) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    for (name, size) in &summary.deleted {
        table.add_row(row![name, r->size]);
    }
    table
}
