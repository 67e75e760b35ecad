// Store configuration
//
// An explicit value handed to TaskStore / SyncController at construction time,
// so independent instances (tests, multiple task files) never share state.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the task file directly
pub const TASK_FILE_ENV: &str = "TASKMD_FILE";
pub const REMOTE_ENV: &str = "TASKMD_REMOTE";
pub const BRANCH_ENV: &str = "TASKMD_BRANCH";
pub const BACKUP_RETENTION_ENV: &str = "TASKMD_BACKUP_RETENTION";

pub const DEFAULT_BACKUP_RETENTION: usize = 50;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_BRANCH: &str = "main";

/// Timing of the sentinel-file lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up after this long
    pub max_wait: Duration,
    /// Sleep between attempts
    pub poll_interval: Duration,
    /// A sentinel older than this is considered abandoned
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(15),
            poll_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Whether more than one task may be in progress at a time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InProgressPolicy {
    #[default]
    Multiple,
    /// Reject moving a task to in-progress while another one is
    Single,
}

/// Configuration for one task file
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub task_file: PathBuf,
    pub lock: LockOptions,
    /// Number of backups kept in `.task-backups/`
    pub backup_retention: usize,
    /// Upper bound for each external `git` invocation
    pub command_timeout: Duration,
    pub remote: String,
    pub branch: String,
    pub in_progress_policy: InProgressPolicy,
    /// How long completed / paused tasks still count as active for consumers
    pub grace_period: Duration,
}

impl StoreConfig {
    /// Defaults for a specific task file
    pub fn for_file(task_file: impl Into<PathBuf>) -> Self {
        Self {
            task_file: task_file.into(),
            lock: LockOptions::default(),
            backup_retention: DEFAULT_BACKUP_RETENTION,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            remote: DEFAULT_REMOTE.to_string(),
            branch: DEFAULT_BRANCH.to_string(),
            in_progress_policy: InProgressPolicy::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let task_file = resolve_task_file(
            std::env::var_os(TASK_FILE_ENV).map(PathBuf::from),
            dirs::data_dir(),
            dirs::home_dir(),
        );
        let mut config = Self::for_file(task_file);

        if let Ok(remote) = std::env::var(REMOTE_ENV) {
            if !remote.trim().is_empty() {
                config.remote = remote.trim().to_string();
            }
        }
        if let Ok(branch) = std::env::var(BRANCH_ENV) {
            if !branch.trim().is_empty() {
                config.branch = branch.trim().to_string();
            }
        }
        if let Some(retention) = std::env::var(BACKUP_RETENTION_ENV)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            config.backup_retention = retention;
        }

        config
    }

    /// Directory holding the task file and its sidecar files
    pub fn data_dir(&self) -> PathBuf {
        parent_dir(&self.task_file)
    }

    /// `.tasks.md.lock` beside the task file
    pub fn lock_file(&self) -> PathBuf {
        sidecar(&self.task_file, "lock")
    }

    /// `.task-backups/` beside the task file
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir().join(".task-backups")
    }

    /// `.tasks.md.sync.json` beside the task file
    pub fn sync_state_file(&self) -> PathBuf {
        sidecar(&self.task_file, "sync.json")
    }
}

/// Pick the task file: explicit override, then the conventional data directory,
/// then the legacy `~/.taskmd/tasks.md`, and finally the data-directory path
/// (created on first write).
pub fn resolve_task_file(
    env_override: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> PathBuf {
    if let Some(path) = env_override.filter(|p| !p.as_os_str().is_empty()) {
        return path;
    }

    let conventional = data_dir.map(|d| d.join("taskmd").join("tasks.md"));
    if let Some(path) = conventional.as_ref().filter(|p| p.exists()) {
        return path.clone();
    }

    let legacy = home_dir.map(|h| h.join(".taskmd").join("tasks.md"));
    if let Some(path) = legacy.as_ref().filter(|p| p.exists()) {
        return path.clone();
    }

    conventional
        .or(legacy)
        .unwrap_or_else(|| PathBuf::from("tasks.md"))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn sidecar(task_file: &Path, suffix: &str) -> PathBuf {
    let name = task_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tasks.md");
    parent_dir(task_file).join(format!(".{}.{}", name, suffix))
}
