//! External command invocation.
//!
//! The core only depends on the invocation contract of external tools
//! (command line, exit code, captured output). [`CommandRunner`] is the seam
//! between handlers and the host; [`SystemRunner`] spawns real processes.

use crate::{BundleError, BundleResult, CancelToken};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

/// A command line to run on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Run through `sudo`.
    pub sudo: bool,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            sudo: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Full argument vector, including the `sudo` prefix when requested.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        if self.sudo {
            argv.push("sudo".to_string());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .argv()
            .into_iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("'{arg}'")
                } else {
                    arg
                }
            })
            .collect();
        f.write_str(&rendered.join(" "))
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `lines` lines of stderr, for reports.
    pub fn stderr_tail(&self, lines: usize) -> String {
        tail(&self.stderr, lines)
    }

    /// Convert a non-zero exit into [`BundleError::ExternalAction`].
    pub fn into_result(self, command: &ExternalCommand) -> BundleResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BundleError::ExternalAction {
                command: command.to_string(),
                code: self.code,
                stderr: self.stderr_tail(20),
            })
        }
    }
}

/// Runs external commands.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is not an error at this level; callers decide.
    /// Implementations return [`BundleError::Cancelled`] when the token fires
    /// while the command is running.
    fn run(&self, command: &ExternalCommand, cancel: &CancelToken) -> BundleResult<CommandOutput>;
}

/// Spawns real processes on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    poll_interval: Duration,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ExternalCommand, cancel: &CancelToken) -> BundleResult<CommandOutput> {
        cancel.check()?;

        let argv = command.argv();
        let mut process = Command::new(&argv[0]);
        process
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        tracing::debug!(command = %command, "spawning external command");
        let mut child = process.spawn().map_err(|e| BundleError::ExternalAction {
            command: command.to_string(),
            code: None,
            stderr: format!("failed to start: {e}"),
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                tracing::warn!(command = %command, "killing external command");
                let _ = child.kill();
                let _ = child.wait();
                return Err(BundleError::Cancelled);
            }
            std::thread::sleep(self.poll_interval);
        };

        let output = CommandOutput {
            code: status.code(),
            stdout: join(stdout),
            stderr: join(stderr),
        };
        tracing::debug!(command = %command, code = ?output.code, "external command finished");
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn ExternalCommand___argv___prefixes_sudo() {
        let command = ExternalCommand::new("sysctl").arg("-p").sudo(true);

        assert_eq!(command.argv(), vec!["sudo", "sysctl", "-p"]);
    }

    #[test]
    fn ExternalCommand___display___quotes_whitespace() {
        let command = ExternalCommand::new("sh").args(["-c", "echo hi"]);

        assert_eq!(command.to_string(), "sh -c 'echo hi'");
    }

    #[test]
    fn CommandOutput___stderr_tail___keeps_last_lines() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "one\ntwo\nthree\n".to_string(),
        };

        assert_eq!(output.stderr_tail(2), "two\nthree");
        assert_eq!(output.stderr_tail(10), "one\ntwo\nthree");
    }

    #[test]
    fn CommandOutput___into_result___maps_failure() {
        let command = ExternalCommand::new("docker").arg("pull");
        let output = CommandOutput {
            code: Some(125),
            stdout: String::new(),
            stderr: "denied".to_string(),
        };

        let err = output.into_result(&command).unwrap_err();

        match err {
            BundleError::ExternalAction { command, code, stderr } => {
                assert_eq!(command, "docker pull");
                assert_eq!(code, Some(125));
                assert_eq!(stderr, "denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn SystemRunner___run___captures_output_and_code() {
        let command = ExternalCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);

        let output = SystemRunner::new()
            .run(&command, &CancelToken::new())
            .unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn SystemRunner___run___uses_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "x").unwrap();
        let command = ExternalCommand::new("ls").cwd(dir.path());

        let output = SystemRunner::new()
            .run(&command, &CancelToken::new())
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("marker"));
    }

    #[test]
    fn SystemRunner___run___missing_program_is_external_action_error() {
        let command = ExternalCommand::new("stackpack-definitely-not-installed");

        let err = SystemRunner::new()
            .run(&command, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, BundleError::ExternalAction { code: None, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn SystemRunner___run___kills_child_on_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let started = std::time::Instant::now();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let err = SystemRunner::new()
            .run(&ExternalCommand::new("sleep").arg("30"), &cancel)
            .unwrap_err();

        assert!(matches!(err, BundleError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn SystemRunner___run___cancelled_token_never_spawns() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = SystemRunner::new()
            .run(&ExternalCommand::new("true"), &cancel)
            .unwrap_err();

        assert!(matches!(err, BundleError::Cancelled));
    }
}
