use std::path::Path;
use std::process::Command;
use std::time::Duration;
use taskmd_lib::sync::{CommandOutput, CommandRunner, GitRunner};

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// GitRunner with a fixed identity and no user/system config
pub fn test_runner(dir: &Path) -> GitRunner {
    GitRunner::new(dir, Duration::from_secs(30))
        .with_env("GIT_AUTHOR_NAME", "Task Tester")
        .with_env("GIT_AUTHOR_EMAIL", "tester@example.com")
        .with_env("GIT_COMMITTER_NAME", "Task Tester")
        .with_env("GIT_COMMITTER_EMAIL", "tester@example.com")
        .with_env("GIT_CONFIG_GLOBAL", "/dev/null")
        .with_env("GIT_CONFIG_NOSYSTEM", "1")
}

/// Run git in `dir` and require success
pub fn git(dir: &Path, args: &[&str]) -> CommandOutput {
    let out = test_runner(dir).run(args).unwrap();
    assert!(
        out.success(),
        "git {} failed in {}: {}",
        args.join(" "),
        dir.display(),
        out.message()
    );
    out
}

pub fn init_bare(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
    git(path, &["init", "--bare", "--quiet"]);
}
