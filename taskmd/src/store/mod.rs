// Task file storage: locking, backups, atomic writes and the mutation engine

pub mod backup;
mod engine;
pub mod file;
pub mod lock;
pub mod query;

pub use backup::BackupManager;
pub use engine::{DeletedTask, TaskStore};
pub use lock::{with_lock, with_lock_refreshed, TaskFileLock};
pub use query::{group_by_quadrant, is_active_within, Quadrant, QuadrantGroups, TaskFilter};
