// Cooperative cross-process lock: a sentinel file created with O_EXCL
//
// `.{basename}.lock` beside the task file, body `{"pid": ..., "timestamp": <epoch ms>}`.
// Holders that crash leave the sentinel behind; it is reclaimed once older than
// `stale_after`.
//
// Only creation is lock-free. Every removal (stale reclaim or release) happens
// under an fs2 exclusive lock on `.{basename}.reclaim.lock` and re-reads the
// sentinel first, so nobody can delete a sentinel that was replaced after they
// looked at it.

use crate::config::LockOptions;
use crate::error::{IoContext, Result, TaskError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Content of the sentinel file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl LockRecord {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: epoch_millis(SystemTime::now()),
        }
    }
}

/// A held lock. Released on [`TaskFileLock::release`] or drop.
#[derive(Debug)]
pub struct TaskFileLock {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl TaskFileLock {
    /// Poll for the sentinel until it is ours or `options.max_wait` elapses.
    pub fn acquire(lock_path: &Path, options: &LockOptions) -> Result<Self> {
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).at_path(parent)?;
        }

        let start = Instant::now();
        loop {
            match Self::try_create(lock_path) {
                Ok(record) => {
                    log::debug!("Acquired lock {}", lock_path.display());
                    return Ok(Self {
                        path: lock_path.to_path_buf(),
                        record,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if stale_reason(lock_path, options.stale_after).is_some()
                        && reclaim_stale(lock_path, options.stale_after).at_path(lock_path)?
                    {
                        continue;
                    }
                }
                Err(e) => return Err(e).at_path(lock_path),
            }

            let waited = start.elapsed();
            if waited >= options.max_wait {
                return Err(TaskError::LockTimeout {
                    path: lock_path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(options.poll_interval.min(options.max_wait - waited));
        }
    }

    fn try_create(lock_path: &Path) -> io::Result<LockRecord> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)?;

        let record = LockRecord::current();
        let body = serde_json::to_vec(&record)?;
        if let Err(e) = file.write_all(&body).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(lock_path);
            return Err(e);
        }
        Ok(record)
    }

    pub fn record(&self) -> LockRecord {
        self.record
    }

    /// Rewrite the sentinel with a new timestamp so long holders are not taken for stale
    pub fn refresh(&mut self) -> Result<()> {
        let record = LockRecord::current();
        let body = serde_json::to_vec(&record).map_err(|source| TaskError::Json {
            path: self.path.clone(),
            source,
        })?;
        with_removal_guard(&self.path, || {
            if read_record(&self.path) != Some(self.record) {
                return Err(io::Error::other("sentinel no longer belongs to this holder"));
            }
            fs::write(&self.path, &body)
        })
        .at_path(&self.path)?;
        self.record = record;
        Ok(())
    }

    /// Remove the sentinel if it is still ours. Safe to call when it is already gone.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Someone may have reclaimed it as stale; leave their sentinel alone
        let released = with_removal_guard(&self.path, || match read_record(&self.path) {
            Some(record) if record == self.record => remove_if_present(&self.path),
            Some(record) => {
                log::warn!(
                    "Lock {} is now held by pid {}; not removing",
                    self.path.display(),
                    record.pid
                );
                Ok(())
            }
            None => Ok(()),
        });
        if let Err(e) = released {
            log::warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for TaskFileLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Run `f` while holding the lock
pub fn with_lock<T>(
    lock_path: &Path,
    options: &LockOptions,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let lock = TaskFileLock::acquire(lock_path, options)?;
    let result = f();
    lock.release();
    result
}

/// `.tasks.md.lock` -> `.tasks.md.reclaim.lock`
fn removal_guard_path(lock_path: &Path) -> PathBuf {
    lock_path.with_extension("reclaim.lock")
}

/// Run `f` while holding the exclusive guard that serializes sentinel removal
fn with_removal_guard<T>(lock_path: &Path, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
    let guard = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(removal_guard_path(lock_path))?;
    guard.lock_exclusive()?;
    let result = f();
    let _ = FileExt::unlock(&guard);
    result
}

/// Remove the sentinel if it is still stale once the guard is held.
/// Returns true when the sentinel is gone and acquisition can retry at once.
fn reclaim_stale(lock_path: &Path, stale_after: Duration) -> io::Result<bool> {
    with_removal_guard(lock_path, || {
        // Another waiter may have reclaimed it and a new holder taken over meanwhile
        match stale_reason(lock_path, stale_after) {
            Some(reason) => {
                log::warn!(
                    "Reclaiming stale lock {} ({})",
                    lock_path.display(),
                    reason
                );
                remove_if_present(lock_path)?;
                Ok(true)
            }
            None => Ok(!lock_path.exists()),
        }
    })
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Like [`with_lock`], for critical sections that may outlast `stale_after`
/// (external commands). A heartbeat refreshes the sentinel while `f` runs.
pub fn with_lock_refreshed<T>(
    lock_path: &Path,
    options: &LockOptions,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let lock = Mutex::new(TaskFileLock::acquire(lock_path, options)?);
    let interval = (options.stale_after / 3).max(Duration::from_millis(10));
    let (stop, stopped) = mpsc::channel::<()>();
    let shared = &lock;

    let result = thread::scope(|scope| {
        scope.spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                let mut held = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(e) = held.refresh() {
                    log::warn!("Stopped refreshing lock {}: {}", lock_path.display(), e);
                    break;
                }
            }
        });
        let result = f();
        drop(stop);
        result
    });

    lock.into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .release();
    result
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let body = fs::read(path).ok()?;
    serde_json::from_slice(&body).ok()
}

/// Why an existing sentinel may be taken over, or `None` if it is live
fn stale_reason(path: &Path, stale_after: Duration) -> Option<String> {
    let now = SystemTime::now();
    let record = read_record(path);

    let age = match record {
        Some(record) => {
            let acquired = UNIX_EPOCH + Duration::from_millis(record.timestamp.max(0) as u64);
            now.duration_since(acquired).unwrap_or_default()
        }
        // Unreadable or half-written body: fall back to the file's mtime
        None => {
            let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
            now.duration_since(modified).unwrap_or_default()
        }
    };

    // The pid is informational only; a holder in another pid namespace looks dead
    (age > stale_after).then(|| format!("age {:?} exceeds {:?}", age, stale_after))
}

fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
