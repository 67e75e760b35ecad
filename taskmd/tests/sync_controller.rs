//! Sync controller logic against a scripted git runner
//!
//! Run with: cargo test --test sync_controller

mod helpers;

use helpers::fixtures::TaskFileFixture;
use helpers::scripted_runner::ScriptedRunner;
use std::fs;
use std::sync::Arc;
use taskmd_lib::sync::{SyncController, SyncStatus};
use taskmd_lib::TaskError;

const PORCELAIN: &str = "status --porcelain --untracked-files=all -- .";
const AHEAD: &str = "rev-list --count refs/remotes/origin/main..HEAD";
const BEHIND: &str = "rev-list --count HEAD..refs/remotes/origin/main";
const STASH: &str = "stash push --include-untracked -m taskmd: local changes before pull -- .";
const REBASE: &str = "rebase refs/remotes/origin/main";

fn controller(fx: &TaskFileFixture, runner: &Arc<ScriptedRunner>) -> SyncController {
    SyncController::new(fx.store.config().clone(), runner.clone())
}

#[test]
fn test_two_unpushed_commits_is_pending() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(AHEAD, "2\n")
            .on(BEHIND, "0\n")
            .on(PORCELAIN, ""),
    );

    let state = controller(&fx, &runner).status().unwrap();

    assert_eq!(state.status, SyncStatus::Pending);
    assert_eq!(state.local_changes, 2);
    assert_eq!(state.remote_changes, 0);
    assert_eq!(state.remote, "origin");
    assert_eq!(state.branch, "main");
    assert!(runner.called("fetch --quiet origin"));
}

#[test]
fn test_dirty_tree_counts_as_local_change() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(AHEAD, "0\n")
            .on(BEHIND, "3\n")
            .on(PORCELAIN, " M tasks.md\n?? .tasks.md.lock\n"),
    );

    let state = controller(&fx, &runner).status().unwrap();
    assert_eq!(state.status, SyncStatus::Diverged);
    assert_eq!(state.local_changes, 1);
    assert_eq!(state.remote_changes, 3);
}

#[test]
fn test_sidecar_files_do_not_make_tree_dirty() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(AHEAD, "0\n")
            .on(BEHIND, "0\n")
            .on(
                PORCELAIN,
                "?? .tasks.md.lock\n?? .tasks.md.sync.json\n?? .task-backups/tasks-2026-02-01T09-30-00-000Z.md\n",
            ),
    );

    let state = controller(&fx, &runner).status().unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
}

#[test]
fn test_failed_fetch_is_tolerated_by_status() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .fail("fetch --quiet origin", "fatal: unable to access remote")
            .on(AHEAD, "0\n")
            .on(BEHIND, "1\n"),
    );

    let state = controller(&fx, &runner).status().unwrap();
    assert_eq!(state.status, SyncStatus::Behind);
}

#[test]
fn test_missing_repository_is_no_remote() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::new().fail("rev-parse --show-toplevel", "fatal: not a git repository"),
    );
    let sync = controller(&fx, &runner);

    assert_eq!(sync.status().unwrap().status, SyncStatus::NoRemote);

    let outcome = sync.pull().unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, SyncStatus::NoRemote);
    assert!(matches!(
        outcome.into_result(),
        Err(TaskError::SyncUnavailable(_))
    ));
    assert!(!runner.called("fetch origin"));
}

#[test]
fn test_missing_remote_is_no_remote() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_at(fx.temp.path())
            .fail("remote get-url origin", "error: No such remote 'origin'"),
    );

    let state = controller(&fx, &runner).status().unwrap();
    assert_eq!(state.status, SyncStatus::NoRemote);
    assert!(state.error.unwrap().contains("origin"));
}

#[test]
fn test_rebase_conflict_reports_backup() {
    let fx = TaskFileFixture::new("- [ ] local edit\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, " M tasks.md\n")
            .on(STASH, "Saved working directory and index state On main: taskmd\n")
            .respond(
                REBASE,
                "",
                "CONFLICT (content): Merge conflict in tasks.md\nerror: could not apply abc123",
                1,
            ),
    );
    let sync = controller(&fx, &runner);

    let outcome = sync.pull().unwrap();

    assert!(!outcome.success);
    let backup = outcome.backup_path.clone().expect("backup path");
    assert_eq!(fs::read_to_string(&backup).unwrap(), "- [ ] local edit\n");
    assert!(runner.called("rebase --abort"));
    assert!(runner.called("stash pop"));

    let state = sync.last_state().unwrap();
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.error.is_some());
    assert_eq!(state.last_sync, None);

    assert!(matches!(
        outcome.into_result(),
        Err(TaskError::SyncConflict { .. })
    ));
}

#[test]
fn test_clean_tree_rebase_conflict_still_backs_up() {
    let fx = TaskFileFixture::new("- [ ] committed locally\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, "")
            .respond(REBASE, "", "CONFLICT (content)", 1),
    );

    let outcome = controller(&fx, &runner).pull().unwrap();
    assert!(!outcome.success);
    assert!(outcome.backup_path.is_some());
    assert!(!runner.called(STASH));
    assert!(!runner.called("stash pop"));
}

#[test]
fn test_stash_pop_conflict_is_partial_success() {
    let fx = TaskFileFixture::new("- [ ] uncommitted\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, " M tasks.md\n")
            .on(PORCELAIN, "")
            .on(STASH, "Saved working directory\n")
            .fail("stash pop", "CONFLICT (content): Merge conflict in tasks.md")
            .on(AHEAD, "0\n")
            .on(BEHIND, "0\n"),
    );
    let sync = controller(&fx, &runner);

    let outcome = sync.pull().unwrap();

    assert!(outcome.success);
    assert!(outcome.partial);
    assert!(outcome.backup_path.is_some());
    assert!(runner.called("reset --hard HEAD"));
    assert!(sync.last_state().unwrap().last_sync.is_some());
}

#[test]
fn test_clean_pull_updates_last_sync() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, "")
            .on(AHEAD, "0\n")
            .on(BEHIND, "0\n"),
    );
    let sync = controller(&fx, &runner);

    let outcome = sync.pull().unwrap();
    assert!(outcome.success);
    assert!(!outcome.partial);
    assert_eq!(outcome.backup_path, None);
    assert_eq!(outcome.status, SyncStatus::Synced);

    let state = sync.last_state().unwrap();
    assert!(state.last_sync.is_some());
    assert_eq!(state.error, None);

    let exclude = fs::read_to_string(fx.temp.path().join(".git/info/exclude")).unwrap();
    assert!(exclude.contains(".task-backups/"));
    assert!(exclude.contains(".*.lock"));
}

#[test]
fn test_push_commits_dirty_work() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, " M tasks.md\n")
            .on(PORCELAIN, "")
            .on(AHEAD, "0\n")
            .on(BEHIND, "0\n"),
    );

    let outcome = controller(&fx, &runner)
        .push(Some("Plan the week"))
        .unwrap();

    assert!(outcome.success, "{}", outcome.message);
    assert!(runner.called("add -A -- ."));
    assert!(runner.called("commit -m Plan the week"));
    assert!(runner.called("push origin HEAD:refs/heads/main"));
}

#[test]
fn test_rejected_push_asks_for_pull() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, "")
            .fail(
                "push origin HEAD:refs/heads/main",
                " ! [rejected]        HEAD -> main (fetch first)\nerror: failed to push some refs",
            ),
    );
    let sync = controller(&fx, &runner);

    let outcome = sync.push(None).unwrap();

    assert!(!outcome.success);
    assert!(outcome.message.contains("pull first"), "{}", outcome.message);
    assert!(runner.calls().iter().all(|c| !c.contains("--force")));
    assert_eq!(sync.last_state().unwrap().last_sync, None);
}

#[test]
fn test_sync_stops_at_failed_pull() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::repo_with_remote(fx.temp.path())
            .on(PORCELAIN, "")
            .respond(REBASE, "", "CONFLICT", 1),
    );

    let outcome = controller(&fx, &runner).sync(None).unwrap();
    assert!(!outcome.success);
    assert!(runner.calls().iter().all(|c| !c.starts_with("push")));
}

#[test]
fn test_init_adds_remote_to_new_repository() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let runner = Arc::new(
        ScriptedRunner::new()
            .fail("rev-parse --show-toplevel", "fatal: not a git repository")
            .on("rev-parse --git-path info/exclude", ".git/info/exclude\n")
            .fail("remote get-url origin", "error: No such remote 'origin'"),
    );

    let outcome = controller(&fx, &runner)
        .init("git@example.com:me/tasks.git")
        .unwrap();

    assert!(outcome.success);
    assert!(runner.called("init"));
    assert!(runner.called("symbolic-ref HEAD refs/heads/main"));
    assert!(runner.called("remote add origin git@example.com:me/tasks.git"));
}

#[test]
fn test_enclosing_repository_is_not_adopted() {
    let fx = TaskFileFixture::new("- [ ] a\n");
    let parent = fx.temp.path().parent().unwrap().to_path_buf();
    let runner = Arc::new(ScriptedRunner::repo_with_remote(&parent));
    let sync = controller(&fx, &runner);

    let state = sync.status().unwrap();
    assert_eq!(state.status, SyncStatus::NoRemote);
    assert!(!runner.called("fetch --quiet origin"));

    sync.init("git@example.com:me/tasks.git").unwrap();
    assert!(runner.called("init"));
}

#[test]
fn test_missing_task_directory_is_no_remote() {
    let temp = tempfile::TempDir::new().unwrap();
    let config = helpers::fixtures::fast_config(&temp.path().join("not-yet").join("tasks.md"));
    let runner = Arc::new(ScriptedRunner::new());
    let sync = SyncController::new(config, runner.clone());

    let state = sync.status().unwrap();
    assert_eq!(state.status, SyncStatus::NoRemote);
    assert!(state.error.unwrap().contains("does not exist"));

    let outcome = sync.push(None).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, SyncStatus::NoRemote);
    assert!(runner.calls().is_empty());
    assert!(!temp.path().join("not-yet").exists());
}
