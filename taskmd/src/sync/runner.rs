// External command boundary for sync
//
// The controller only sees `run(args) -> {stdout, stderr, exit_code}`, so its
// logic can be driven by a scripted runner in tests.

use crate::error::{Result, TaskError};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout, trimmed
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// stderr if present, else stdout; used in failure messages
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs version-control commands. `args` excludes the program name.
pub trait CommandRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs `git` in a fixed working directory with a per-command timeout
#[derive(Debug, Clone)]
pub struct GitRunner {
    program: String,
    workdir: PathBuf,
    timeout: Duration,
    envs: Vec<(String, String)>,
}

impl GitRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: "git".to_string(),
            workdir: workdir.into(),
            timeout,
            // Never block on a credential prompt
            envs: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command_error(&self, args: &[&str], message: impl Into<String>) -> TaskError {
        TaskError::Command {
            program: format!("{} {}", self.program, args.join(" ")),
            message: message.into(),
        }
    }
}

impl CommandRunner for GitRunner {
    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("Running {} {} in {}", self.program, args.join(" "), self.workdir.display());

        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(&self.workdir)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.command_error(args, format!("failed to spawn: {}", e)))?;

        // Drain both pipes concurrently so a chatty command can't fill one and stall
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(
                            self.command_error(args, format!("timed out after {:?}", self.timeout))
                        );
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(self.command_error(args, format!("failed to wait: {}", e)));
                }
            }
        };

        Ok(CommandOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
