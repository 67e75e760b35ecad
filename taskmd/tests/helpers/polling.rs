use std::fmt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 5;
const MAX_DELAY_MS: u64 = 200;

/// A condition did not become true in time
#[derive(Debug)]
pub struct WaitError {
    what: String,
    attempts: u32,
    waited: Duration,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}",
            self.attempts, self.waited, self.what
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll `condition` with exponential backoff until it holds or `timeout` passes
pub fn wait_until<F>(what: &str, timeout: Duration, condition: F) -> Result<(), WaitError>
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;

    loop {
        attempts += 1;
        if condition() {
            return Ok(());
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                what: what.to_string(),
                attempts,
                waited: start.elapsed(),
            });
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }
}

pub fn wait_for_path(path: &Path, timeout: Duration) -> Result<(), WaitError> {
    wait_until(&path.display().to_string(), timeout, || path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wait_for_path_returns_when_present() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("ready");
        std::fs::write(&file, "").unwrap();
        wait_for_path(&file, Duration::from_secs(1)).expect("file exists");
    }

    #[test]
    fn wait_until_times_out_with_context() {
        let err = wait_until("never", Duration::from_millis(1), || false).unwrap_err();
        assert!(err.to_string().contains("never"));
    }
}
