// Error taxonomy shared by the store and the sync controller

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors surfaced by the task store and the sync controller
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The id is not present in the current snapshot (ids go stale between read and write)
    #[error("Task not found: {id}")]
    NotFound { id: String },

    /// Nesting depth exceeded, incomplete children, bad filter input, ...
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Could not acquire lock {} within {:?}", path.display(), waited)]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Rebase or stash restore could not complete; local content was saved to `backup`
    #[error("Sync conflict: {message} (backup: {})", backup.display())]
    SyncConflict { message: String, backup: PathBuf },

    /// No repository or no configured remote
    #[error("Sync unavailable: {0}")]
    SyncUnavailable(String),

    /// External command could not be spawned or exceeded its timeout
    #[error("Command `{program}` failed: {message}")]
    Command { program: String, message: String },
}

pub type Result<T, E = TaskError> = std::result::Result<T, E>;

impl TaskError {
    pub fn not_found(id: impl Into<String>) -> Self {
        TaskError::NotFound { id: id.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }
}

/// Attach a path to a raw `io::Error`
pub trait IoContext<T> {
    fn at_path(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| TaskError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
