use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use taskmd_lib::sync::{CommandOutput, CommandRunner};
use taskmd_lib::Result;

/// Answers git invocations from a script instead of running git.
///
/// Responses are keyed by the space-joined argument list. A key scripted more
/// than once answers in order, and its last answer repeats. Unscripted
/// commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, args: &str, stdout: &str) -> Self {
        self.respond(args, stdout, "", 0)
    }

    pub fn fail(self, args: &str, stderr: &str) -> Self {
        self.respond(args, "", stderr, 1)
    }

    pub fn respond(self, args: &str, stdout: &str, stderr: &str, exit_code: i32) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(args.to_string())
            .or_default()
            .push_back(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            });
        self
    }

    /// A repository rooted at `dir`, without a remote
    pub fn repo_at(dir: &Path) -> Self {
        Self::new().on(
            "rev-parse --show-toplevel",
            &format!("{}\n", dir.display()),
        )
    }

    /// A repository rooted at `dir` with `origin`, a born HEAD and a remote tracking branch
    pub fn repo_with_remote(dir: &Path) -> Self {
        Self::repo_at(dir)
            .on("remote get-url origin", "git@example.com:me/tasks.git\n")
            .on("rev-parse --git-path info/exclude", ".git/info/exclude\n")
            .on("rev-parse --verify --quiet HEAD", "abc123\n")
            .on("rev-parse --verify --quiet refs/remotes/origin/main", "def456\n")
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, args: &str) -> bool {
        self.calls().iter().any(|c| c == args)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let key = args.join(" ");
        self.calls.lock().unwrap().push(key.clone());

        let mut responses = self.responses.lock().unwrap();
        let output = match responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::default(),
        };
        Ok(output)
    }
}
