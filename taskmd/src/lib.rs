// Task store for a single Markdown task file
//
// Parsing and rendering (`markdown`) are pure; `store` owns every filesystem
// mutation of the task file and `sync` reconciles its directory with a git remote.

pub mod clock;
pub mod config;
pub mod error;
pub mod markdown;
pub mod model;
pub mod store;
pub mod sync;

pub use config::{InProgressPolicy, LockOptions, StoreConfig};
pub use error::{Result, TaskError};
pub use model::{Modifier, NewTask, Task, TaskDates, TaskPatch, TaskSnapshot, TaskStatus};
pub use store::{DeletedTask, TaskFilter, TaskStore};
pub use sync::{SyncController, SyncOutcome, SyncState, SyncStatus};
