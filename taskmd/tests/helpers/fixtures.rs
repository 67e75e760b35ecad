use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use taskmd_lib::config::LockOptions;
use taskmd_lib::{StoreConfig, TaskStore};
use tempfile::TempDir;

/// A task file in its own temp directory plus a store bound to it
pub struct TaskFileFixture {
    pub temp: TempDir,
    pub path: PathBuf,
    pub store: TaskStore,
}

impl TaskFileFixture {
    pub fn new(content: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.md");
        fs::write(&path, content).unwrap();
        let store = TaskStore::new(fast_config(&path));
        Self { temp, path, store }
    }

    pub fn content(&self) -> String {
        fs::read_to_string(&self.path).unwrap()
    }

    /// Id of the first task with this description in a fresh snapshot
    pub fn id_of(&self, description: &str) -> String {
        self.store
            .snapshot()
            .unwrap()
            .tasks
            .into_iter()
            .find(|t| t.description == description)
            .unwrap_or_else(|| panic!("no task '{}' in:\n{}", description, self.content()))
            .id
    }
}

/// Store config with short lock timings so contention tests finish quickly
pub fn fast_config(path: &std::path::Path) -> StoreConfig {
    let mut config = StoreConfig::for_file(path);
    config.lock = fast_lock_options();
    config
}

pub fn fast_lock_options() -> LockOptions {
    LockOptions {
        max_wait: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
        stale_after: Duration::from_secs(10),
    }
}
