// Pre-write backups of the task file with bounded retention
//
// Layout: <task dir>/.task-backups/tasks-2026-02-01T09-30-00-000Z.md
// Names embed a sortable timestamp, so name order is age order.

use crate::clock::format_timestamp;
use crate::error::{IoContext, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

const BACKUP_PREFIX: &str = "tasks-";
const BACKUP_SUFFIX: &str = ".md";

/// Writes and prunes backups in one directory
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `content` verbatim as a new backup and return its path
    pub fn write(&self, content: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).at_path(&self.dir)?;

        let stamp = format_timestamp(now).replace([':', '.'], "-");
        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_SUFFIX)
            } else {
                format!("{}{}-{}{}", BACKUP_PREFIX, stamp, attempt, BACKUP_SUFFIX)
            };
            let path = self.dir.join(name);

            // Never overwrite an existing backup; two writes in one millisecond get a counter
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .and_then(|_| file.sync_all())
                        .at_path(&path)?;
                    log::debug!("Wrote backup {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e).at_path(&path),
            }
        }
    }

    /// All backups, oldest first
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<PathBuf> = walkdir::WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_backup_name(p))
            .collect();
        backups.sort_by(|a, b| backup_sort_key(a).cmp(&backup_sort_key(b)));
        Ok(backups)
    }

    /// Delete the oldest backups beyond the retention limit.
    /// Returns the number of files removed.
    pub fn prune(&self) -> Result<usize> {
        let backups = self.list()?;
        if backups.len() <= self.retention {
            return Ok(0);
        }

        let excess = backups.len() - self.retention;
        let mut removed = 0;
        for path in backups.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to prune backup {}: {}", path.display(), e),
            }
        }
        log::debug!("Pruned {} backup(s) in {}", removed, self.dir.display());
        Ok(removed)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop())
    }
}

fn is_backup_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX))
        .unwrap_or(false)
}

/// (timestamp, counter) so `...Z-1.md` sorts after `...Z.md`
fn backup_sort_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name
        .strip_prefix(BACKUP_PREFIX)
        .and_then(|n| n.strip_suffix(BACKUP_SUFFIX))
        .unwrap_or(name);
    match stem.rsplit_once("Z-") {
        Some((stamp, counter)) => (format!("{}Z", stamp), counter.parse().unwrap_or(0)),
        None => (stem.to_string(), 0),
    }
}
