// Git-backed sync of the task file's directory
//
// Pull:  [backup + stash] -> fetch -> rebase remote/branch -> [stash pop]
// Push:  [add + commit] -> push HEAD:branch (never forced)
// Sync:  pull, then push
//
// The stash/rebase/pop and add/commit steps run under the same sentinel lock as
// TaskStore mutations, so git never rewrites the file in the middle of an edit.
// Git steps can outlast the stale timeout, so the sentinel is refreshed meanwhile.

use super::runner::{CommandOutput, CommandRunner};
use super::state::{SyncState, SyncStateFile, SyncStatus};
use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{IoContext, Result, TaskError};
use crate::store::file::read_content;
use crate::store::{with_lock_refreshed, BackupManager};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Patterns written to `.git/info/exclude` so sidecar files are never committed or stashed
const EXCLUDE_PATTERNS: [&str; 4] = [".task-backups/", ".*.lock", ".*.sync.json", ".*.tmp.*"];

const STASH_MESSAGE: &str = "taskmd: local changes before pull";

/// Result of a pull / push / sync / init
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    /// Remote state was applied but local uncommitted work only survives in the backup
    #[serde(default)]
    pub partial: bool,
    pub status: SyncStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

impl SyncOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            partial: false,
            status: SyncStatus::Synced,
            message: message.into(),
            backup_path: None,
        }
    }

    fn failed(status: SyncStatus, message: impl Into<String>, backup_path: Option<PathBuf>) -> Self {
        Self {
            success: false,
            partial: false,
            status,
            message: message.into(),
            backup_path,
        }
    }

    fn with_backup(mut self, backup_path: Option<PathBuf>) -> Self {
        self.backup_path = backup_path;
        self
    }

    /// `Ok` on success (including partial); otherwise the matching error.
    /// Failures that saved a backup become [`TaskError::SyncConflict`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        match (self.backup_path, self.status) {
            (Some(backup), _) => Err(TaskError::SyncConflict {
                message: self.message,
                backup,
            }),
            (None, SyncStatus::NoRemote) => Err(TaskError::SyncUnavailable(self.message)),
            (None, _) => Err(TaskError::Command {
                program: "git".to_string(),
                message: self.message,
            }),
        }
    }
}

/// Reconciles the local task directory with a git remote
pub struct SyncController {
    config: StoreConfig,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    state: SyncStateFile,
}

impl SyncController {
    pub fn new(config: StoreConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_clock(config, runner, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: StoreConfig,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = SyncStateFile::new(config.sync_state_file());
        Self {
            config,
            runner,
            clock,
            state,
        }
    }

    /// Last persisted state, without touching git
    pub fn last_state(&self) -> Result<SyncState> {
        self.state.load()
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Fetch (best effort), count commits on each side and classify
    pub fn status(&self) -> Result<SyncState> {
        if let Some(reason) = self.missing_dir() {
            // Reported but not persisted; the directory is created on first write
            let mut state = self.state.load()?;
            self.stamp_target(&mut state);
            state.status = SyncStatus::NoRemote;
            state.local_changes = 0;
            state.remote_changes = 0;
            state.error = Some(reason);
            return Ok(state);
        }
        if let Some(reason) = self.unavailable_reason()? {
            return self.state.update(|s| {
                self.stamp_target(s);
                s.status = SyncStatus::NoRemote;
                s.local_changes = 0;
                s.remote_changes = 0;
                s.error = Some(reason);
            });
        }

        match self.runner.run(&["fetch", "--quiet", &self.config.remote]) {
            Ok(out) if out.success() => {}
            Ok(out) => log::warn!("Fetch from {} failed: {}", self.config.remote, out.message()),
            Err(e) => log::warn!("Fetch from {} failed: {}", self.config.remote, e),
        }

        let (local, remote) = self.counts()?;
        let status = SyncStatus::classify(local, remote);
        log::debug!("Sync status {} (local {}, remote {})", status, local, remote);

        self.state.update(|s| {
            self.stamp_target(s);
            s.status = status;
            s.local_changes = local;
            s.remote_changes = remote;
            s.error = None;
        })
    }

    pub fn pull(&self) -> Result<SyncOutcome> {
        self.run_operation("pull", || self.pull_inner())
    }

    pub fn push(&self, message: Option<&str>) -> Result<SyncOutcome> {
        self.run_operation("push", || self.push_inner(message))
    }

    /// Pull then push; the first failure is returned as is
    pub fn sync(&self, message: Option<&str>) -> Result<SyncOutcome> {
        self.run_operation("sync", || {
            let pulled = self.pull_inner()?;
            if !pulled.success {
                return Ok(pulled);
            }
            let pushed = self.push_inner(message)?;
            if !pushed.success {
                return Ok(pushed.with_backup(pulled.backup_path));
            }
            Ok(SyncOutcome {
                partial: pulled.partial,
                message: if pulled.partial {
                    format!("{}; {}", pulled.message, pushed.message)
                } else {
                    format!(
                        "Synced with {}/{}",
                        self.config.remote, self.config.branch
                    )
                },
                ..pushed
            }
            .with_backup(pulled.backup_path))
        })
    }

    /// Create the repository if needed and point the remote at `url`
    pub fn init(&self, url: &str) -> Result<SyncOutcome> {
        let url = url.trim();
        if url.is_empty() {
            return Err(TaskError::validation("Remote URL must not be empty"));
        }

        let dir = self.config.data_dir();
        fs::create_dir_all(&dir).at_path(&dir)?;

        if !self.is_repo()? {
            self.git_ok(&["init"])?;
            let head = format!("refs/heads/{}", self.config.branch);
            self.git_ok(&["symbolic-ref", "HEAD", &head])?;
            log::info!("Initialized git repository in {}", dir.display());
        }
        self.ensure_excludes()?;

        let remote = self.config.remote.as_str();
        if self.has_remote()? {
            self.git_ok(&["remote", "set-url", remote, url])?;
        } else {
            self.git_ok(&["remote", "add", remote, url])?;
        }
        log::info!("Remote {} set to {}", remote, url);

        let outcome = SyncOutcome::ok(format!("Remote {} set to {}", remote, url));
        self.record(outcome, false)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn run_operation(
        &self,
        name: &str,
        operation: impl FnOnce() -> Result<SyncOutcome>,
    ) -> Result<SyncOutcome> {
        if let Some(reason) = self.missing_dir() {
            return Ok(SyncOutcome::failed(SyncStatus::NoRemote, reason, None));
        }
        if let Some(reason) = self.unavailable_reason()? {
            let outcome = SyncOutcome::failed(SyncStatus::NoRemote, reason, None);
            return self.record(outcome, false);
        }

        self.state.update(|s| {
            self.stamp_target(s);
            s.status = SyncStatus::Syncing;
        })?;

        match operation() {
            Ok(outcome) => {
                if outcome.success {
                    log::info!("{} succeeded: {}", name, outcome.message);
                } else {
                    log::warn!("{} failed: {}", name, outcome.message);
                }
                self.record(outcome, true)
            }
            Err(e) => {
                log::warn!("{} failed: {}", name, e);
                let message = e.to_string();
                if let Err(state_err) = self.state.update(|s| {
                    s.status = SyncStatus::Error;
                    s.error = Some(message);
                }) {
                    log::warn!("Failed to record sync error: {}", state_err);
                }
                Err(e)
            }
        }
    }

    fn pull_inner(&self) -> Result<SyncOutcome> {
        self.ensure_excludes()?;
        let remote = self.config.remote.as_str();
        let branch = self.config.branch.as_str();
        let remote_ref = self.remote_ref();

        let fetch = self.runner.run(&["fetch", remote])?;
        if !fetch.success() {
            return Ok(SyncOutcome::failed(
                SyncStatus::Error,
                format!("Fetch from {} failed: {}", remote, fetch.message()),
                None,
            ));
        }
        if !self.ref_exists(&remote_ref)? {
            return Ok(SyncOutcome::ok(format!(
                "{}/{} does not exist yet; nothing to pull",
                remote, branch
            )));
        }

        with_lock_refreshed(&self.config.lock_file(), &self.config.lock, || {
            if !self.ref_exists("HEAD")? {
                // Unborn branch: adopt the remote history wholesale
                let backup = self.backup_task_file()?;
                self.git_ok(&["checkout", "-f", "-B", branch, &remote_ref])?;
                return Ok(SyncOutcome::ok(format!("Checked out {}/{}", remote, branch))
                    .with_backup(backup));
            }

            let mut backup = None;
            let mut stashed = false;
            if self.is_dirty()? {
                backup = self.backup_task_file()?;
                let stash = self.runner.run(&[
                    "stash",
                    "push",
                    "--include-untracked",
                    "-m",
                    STASH_MESSAGE,
                    "--",
                    ".",
                ])?;
                if !stash.success() {
                    return Ok(SyncOutcome::failed(
                        SyncStatus::Error,
                        format!("Could not stash local changes: {}", stash.message()),
                        backup,
                    ));
                }
                stashed = !stash.text().contains("No local changes to save");
            }

            let rebase = self.runner.run(&["rebase", &remote_ref])?;
            if !rebase.success() {
                self.abort_rebase(stashed);
                let backup = match backup {
                    Some(path) => Some(path),
                    None => self.backup_task_file()?,
                };
                return Ok(SyncOutcome::failed(
                    SyncStatus::Error,
                    format!(
                        "Rebase onto {} failed; local history was kept: {}",
                        remote_ref,
                        rebase.message()
                    ),
                    backup,
                ));
            }

            if stashed {
                let pop = self.runner.run(&["stash", "pop"])?;
                if !pop.success() {
                    let reset = self.runner.run(&["reset", "--hard", "HEAD"])?;
                    if !reset.success() {
                        log::warn!("Reset after failed stash pop failed: {}", reset.message());
                    }
                    return Ok(SyncOutcome {
                        partial: true,
                        ..SyncOutcome::ok(format!(
                            "Pulled {}/{}, but local changes conflicted with it; they are saved in the backup and kept in the stash",
                            remote, branch
                        ))
                    }
                    .with_backup(backup));
                }
            }

            Ok(SyncOutcome::ok(format!("Pulled {}/{}", remote, branch)).with_backup(backup))
        })
    }

    fn push_inner(&self, message: Option<&str>) -> Result<SyncOutcome> {
        self.ensure_excludes()?;
        let remote = self.config.remote.as_str();
        let branch = self.config.branch.as_str();

        let committed = with_lock_refreshed(&self.config.lock_file(), &self.config.lock, || {
            if !self.is_dirty()? {
                return Ok(false);
            }
            let default_message = format!(
                "Update tasks ({})",
                format_timestamp(self.clock.now_utc())
            );
            let message = message
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(&default_message);
            self.git_ok(&["add", "-A", "--", "."])?;
            self.git_ok(&["commit", "-m", message])?;
            Ok(true)
        })?;

        if !self.ref_exists("HEAD")? {
            return Ok(SyncOutcome::ok("Nothing to push"));
        }

        let target = format!("HEAD:refs/heads/{}", branch);
        let push = self.runner.run(&["push", remote, &target])?;
        if !push.success() {
            let message = if is_rejection(&push) {
                format!(
                    "Push to {}/{} was rejected because the remote has changes you don't have; pull first",
                    remote, branch
                )
            } else {
                format!("Push to {}/{} failed: {}", remote, branch, push.message())
            };
            return Ok(SyncOutcome::failed(SyncStatus::Error, message, None));
        }

        Ok(SyncOutcome::ok(if committed {
            format!("Committed local changes and pushed to {}/{}", remote, branch)
        } else {
            format!("Pushed to {}/{}", remote, branch)
        }))
    }

    /// Abort a failed rebase and put stashed work back. Failures here are
    /// logged; the backup already holds the task file.
    fn abort_rebase(&self, stashed: bool) {
        match self.runner.run(&["rebase", "--abort"]) {
            Ok(out) if !out.success() => log::warn!("rebase --abort failed: {}", out.message()),
            Err(e) => log::warn!("rebase --abort failed: {}", e),
            Ok(_) => {}
        }
        if stashed {
            match self.runner.run(&["stash", "pop"]) {
                Ok(out) if !out.success() => {
                    log::warn!("Restoring stash after failed rebase failed: {}", out.message())
                }
                Err(e) => log::warn!("Restoring stash after failed rebase failed: {}", e),
                Ok(_) => {}
            }
        }
    }

    /// Persist the outcome. Successful outcomes get a fresh status from the
    /// commit counts and, when `touch_last_sync`, a new lastSync.
    fn record(&self, mut outcome: SyncOutcome, touch_last_sync: bool) -> Result<SyncOutcome> {
        let mut counts = None;
        if outcome.success {
            match self.counts() {
                Ok((local, remote)) => {
                    outcome.status = SyncStatus::classify(local, remote);
                    counts = Some((local, remote));
                }
                Err(e) => log::warn!("Could not count commits after sync: {}", e),
            }
        }

        let now = format_timestamp(self.clock.now_utc());
        self.state.update(|s| {
            self.stamp_target(s);
            s.status = outcome.status;
            if let Some((local, remote)) = counts {
                s.local_changes = local;
                s.remote_changes = remote;
            }
            if outcome.success {
                s.error = None;
                if touch_last_sync {
                    s.last_sync = Some(now);
                }
            } else {
                s.error = Some(outcome.message.clone());
            }
        })?;
        Ok(outcome)
    }

    // ========================================================================
    // Git queries
    // ========================================================================

    fn git_ok(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self.runner.run(args)?;
        if !out.success() {
            return Err(TaskError::Command {
                program: format!("git {}", args.join(" ")),
                message: out.message(),
            });
        }
        Ok(out)
    }

    /// True only when the task directory is the top of its own work tree.
    /// An enclosing repository (a dotfiles home, a notes repo) does not count.
    fn is_repo(&self) -> Result<bool> {
        let dir = self.config.data_dir();
        if !dir.is_dir() {
            return Ok(false);
        }
        let out = self.runner.run(&["rev-parse", "--show-toplevel"])?;
        if !out.success() || out.text().is_empty() {
            return Ok(false);
        }
        Ok(same_dir(Path::new(out.text()), &dir))
    }

    fn has_remote(&self) -> Result<bool> {
        Ok(self
            .runner
            .run(&["remote", "get-url", &self.config.remote])?
            .success())
    }

    fn missing_dir(&self) -> Option<String> {
        let dir = self.config.data_dir();
        (!dir.is_dir()).then(|| format!("{} does not exist yet", dir.display()))
    }

    /// `Some(reason)` when there is no repository or no remote to sync with
    fn unavailable_reason(&self) -> Result<Option<String>> {
        if !self.is_repo()? {
            return Ok(Some(format!(
                "{} is not a git repository",
                self.config.data_dir().display()
            )));
        }
        if !self.has_remote()? {
            return Ok(Some(format!(
                "No remote named '{}' is configured",
                self.config.remote
            )));
        }
        Ok(None)
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.config.remote, self.config.branch)
    }

    fn ref_exists(&self, reference: &str) -> Result<bool> {
        Ok(self
            .runner
            .run(&["rev-parse", "--verify", "--quiet", reference])?
            .success())
    }

    fn count_commits(&self, range: &str) -> Result<u32> {
        let out = self.git_ok(&["rev-list", "--count", range])?;
        out.text().parse().map_err(|_| TaskError::Command {
            program: format!("git rev-list --count {}", range),
            message: format!("unexpected output '{}'", out.text()),
        })
    }

    /// (local-only, remote-only) commit counts, plus one local change for a dirty tree
    fn counts(&self) -> Result<(u32, u32)> {
        let remote_ref = self.remote_ref();
        let head = self.ref_exists("HEAD")?;
        let tracked = self.ref_exists(&remote_ref)?;

        let (mut local, remote) = match (head, tracked) {
            (true, true) => (
                self.count_commits(&format!("{}..HEAD", remote_ref))?,
                self.count_commits(&format!("HEAD..{}", remote_ref))?,
            ),
            (true, false) => (self.count_commits("HEAD")?, 0),
            (false, true) => (0, self.count_commits(&remote_ref)?),
            (false, false) => (0, 0),
        };

        if self.is_dirty()? {
            local += 1;
        }
        Ok((local, remote))
    }

    /// Uncommitted changes other than our own sidecar files
    fn is_dirty(&self) -> Result<bool> {
        let out = self.git_ok(&["status", "--porcelain", "--untracked-files=all", "--", "."])?;
        Ok(out
            .stdout
            .lines()
            .filter_map(porcelain_path)
            .any(|path| !is_sidecar(&path)))
    }

    // ========================================================================
    // Local files
    // ========================================================================

    /// Add our sidecar patterns to `.git/info/exclude` if missing
    fn ensure_excludes(&self) -> Result<()> {
        let out = self.git_ok(&["rev-parse", "--git-path", "info/exclude"])?;
        let path = self.config.data_dir().join(out.text());

        let existing = read_content(&path)?;
        let missing: Vec<&str> = EXCLUDE_PATTERNS
            .iter()
            .copied()
            .filter(|pattern| !existing.lines().any(|line| line.trim() == *pattern))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut contents = existing;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        for pattern in missing {
            contents.push_str(pattern);
            contents.push('\n');
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        fs::write(&path, contents).at_path(&path)?;
        log::debug!("Updated {}", path.display());
        Ok(())
    }

    /// Back up the task file's current content; `None` when there is nothing to save
    fn backup_task_file(&self) -> Result<Option<PathBuf>> {
        let content = read_content(&self.config.task_file)?;
        if content.is_empty() {
            return Ok(None);
        }
        let backups = BackupManager::new(self.config.backup_dir(), self.config.backup_retention);
        let path = backups.write(&content, self.clock.now_utc())?;
        if let Err(e) = backups.prune() {
            log::warn!("Backup pruning failed: {}", e);
        }
        Ok(Some(path))
    }

    fn stamp_target(&self, state: &mut SyncState) {
        state.branch = self.config.branch.clone();
        state.remote = self.config.remote.clone();
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Path from a `git status --porcelain` line (`XY path` or `XY old -> new`)
fn porcelain_path(line: &str) -> Option<String> {
    let path = line.get(3..)?;
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    let path = path.trim().trim_matches('"');
    (!path.is_empty()).then(|| path.to_string())
}

fn is_sidecar(path: &str) -> bool {
    let path = Path::new(path);
    if path.components().any(|c| c.as_os_str() == ".task-backups") {
        return true;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.')
        && (name.ends_with(".lock") || name.ends_with(".sync.json") || name.contains(".tmp."))
}

fn is_rejection(out: &CommandOutput) -> bool {
    let text = format!("{}\n{}", out.stderr, out.stdout).to_lowercase();
    ["rejected", "non-fast-forward", "fetch first"]
        .iter()
        .any(|needle| text.contains(needle))
}
