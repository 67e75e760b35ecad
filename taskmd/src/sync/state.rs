// Persisted sync state
// Stored as `.{basename}.sync.json` beside the task file; read-merge-written under an fs2 lock

use crate::error::{IoContext, Result, TaskError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Relationship between the local and remote copies of the task file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    /// Local commits or uncommitted edits not yet on the remote
    Pending,
    /// Remote has commits we don't
    Behind,
    /// Both sides have commits the other lacks
    Diverged,
    /// An operation is in flight
    Syncing,
    Error,
    #[default]
    NoRemote,
}

impl SyncStatus {
    pub fn classify(local_changes: u32, remote_changes: u32) -> Self {
        match (local_changes > 0, remote_changes > 0) {
            (true, true) => SyncStatus::Diverged,
            (true, false) => SyncStatus::Pending,
            (false, true) => SyncStatus::Behind,
            (false, false) => SyncStatus::Synced,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Behind => "behind",
            SyncStatus::Diverged => "diverged",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::NoRemote => "no-remote",
        };
        f.write_str(name)
    }
}

/// Last known sync state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncState {
    pub status: SyncStatus,
    /// RFC 3339 time of the last successful pull/push/sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    pub local_changes: u32,
    pub remote_changes: u32,
    pub branch: String,
    pub remote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle on the state file
#[derive(Debug, Clone)]
pub struct SyncStateFile {
    path: PathBuf,
}

impl SyncStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or the default if the file is missing or empty
    pub fn load(&self) -> Result<SyncState> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => parse_state(&self.path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncState::default()),
            Err(e) => Err(e).at_path(&self.path),
        }
    }

    /// Read, apply `f`, and write back while holding an exclusive lock on the file
    pub fn update(&self, f: impl FnOnce(&mut SyncState)) -> Result<SyncState> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).at_path(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .at_path(&self.path)?;

        // TODO(windows): Use CreateFile locking on Windows
        file.lock_exclusive().at_path(&self.path)?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).at_path(&self.path)?;
        // A corrupt state file is replaced rather than blocking sync
        let mut state = parse_state(&self.path, &contents).unwrap_or_else(|e| {
            log::warn!("{}; starting from an empty sync state", e);
            SyncState::default()
        });

        f(&mut state);

        let json = serde_json::to_string_pretty(&state).map_err(|source| TaskError::Json {
            path: self.path.clone(),
            source,
        })?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(json.as_bytes()))
            .and_then(|_| file.sync_all())
            .at_path(&self.path)?;

        // Lock is released when the file is dropped
        Ok(state)
    }
}

fn parse_state(path: &Path, contents: &str) -> Result<SyncState> {
    if contents.trim().is_empty() {
        return Ok(SyncState::default());
    }
    serde_json::from_str(contents).map_err(|source| TaskError::Json {
        path: path.to_path_buf(),
        source,
    })
}
