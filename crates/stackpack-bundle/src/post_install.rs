//! Post-install actions.
//!
//! Actions are opaque to the installer: a command line, an exit code and the
//! captured output. A failing critical action skips the remaining ones; a
//! failing non-critical action is recorded and the run continues.

use crate::command::{CommandRunner, ExternalCommand};
use crate::manifest::PostInstallAction;
use crate::report::{ActionOutcome, ActionReport};
use crate::workspace::safe_join;
use crate::{BundleError, BundleResult, CancelToken};
use std::path::{Path, PathBuf};

const STDERR_TAIL_LINES: usize = 20;

/// Result of running the post-install stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostInstallRun {
    pub actions: Vec<ActionReport>,
    pub cancelled: bool,
    pub critical_failure: bool,
}

/// Runs post-install actions in order inside a workspace.
pub struct PostInstallRunner<'a> {
    runner: &'a dyn CommandRunner,
    workspace: &'a Path,
    cancel: &'a CancelToken,
}

impl<'a> PostInstallRunner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, workspace: &'a Path, cancel: &'a CancelToken) -> Self {
        Self {
            runner,
            workspace,
            cancel,
        }
    }

    pub fn run_all(&self, actions: &[PostInstallAction]) -> PostInstallRun {
        let mut run = PostInstallRun::default();

        for action in actions {
            let command = build_command(action, self.workspace);
            let rendered = command.to_string();

            let skip_reason = if run.cancelled || self.cancel.is_cancelled() {
                run.cancelled = true;
                Some("cancelled")
            } else if run.critical_failure {
                Some("an earlier critical action failed")
            } else {
                None
            };
            if let Some(reason) = skip_reason {
                tracing::info!(action = %action.name, reason, "skipping post-install action");
                run.actions.push(report(action, rendered, skipped(reason)));
                continue;
            }

            tracing::info!(action = %action.name, command = %rendered, "running post-install action");
            let outcome = match self.execute(action, &command) {
                Ok(outcome) => outcome,
                Err(BundleError::Cancelled) => {
                    run.cancelled = true;
                    skipped("cancelled")
                }
                Err(e) => ActionOutcome::Failed {
                    code: None,
                    stderr_tail: e.to_string(),
                },
            };

            if let ActionOutcome::Failed { code, .. } = &outcome {
                if action.critical {
                    tracing::error!(action = %action.name, code = ?code, "critical post-install action failed");
                    run.critical_failure = true;
                } else {
                    tracing::warn!(action = %action.name, code = ?code, "post-install action failed");
                }
            }
            run.actions.push(report(action, rendered, outcome));
        }

        run
    }

    fn execute(&self, action: &PostInstallAction, command: &ExternalCommand) -> BundleResult<ActionOutcome> {
        if action.interpreter.is_none()
            && let Some(script) = script_path(action, self.workspace)
        {
            make_executable(&script)?;
        }

        let output = self.runner.run(command, self.cancel)?;
        if output.success() {
            Ok(ActionOutcome::Succeeded)
        } else {
            Ok(ActionOutcome::Failed {
                code: output.code,
                stderr_tail: output.stderr_tail(STDERR_TAIL_LINES),
            })
        }
    }
}

/// Mark every action skipped, e.g. when an artifact import failed.
pub fn skip_all(actions: &[PostInstallAction], workspace: &Path, reason: &str) -> Vec<ActionReport> {
    actions
        .iter()
        .map(|action| {
            let rendered = build_command(action, workspace).to_string();
            report(action, rendered, skipped(reason))
        })
        .collect()
}

/// Command line for an action.
///
/// `run` naming a file in the workspace is a script; anything else is a
/// shell command whose positional parameters are the action's `args`.
pub fn build_command(action: &PostInstallAction, workspace: &Path) -> ExternalCommand {
    let command = match (script_path(action, workspace), &action.interpreter) {
        (Some(script), Some(interpreter)) => ExternalCommand::new(interpreter.as_str())
            .arg(script.to_string_lossy())
            .args(action.args.iter().cloned()),
        (Some(script), None) => {
            ExternalCommand::new(script.to_string_lossy()).args(action.args.iter().cloned())
        }
        (None, interpreter) => {
            let shell = interpreter.as_deref().unwrap_or("sh");
            let script = if action.args.is_empty() {
                action.run.clone()
            } else {
                format!("{} \"$@\"", action.run)
            };
            ExternalCommand::new(shell)
                .arg("-c")
                .arg(script)
                .arg(shell)
                .args(action.args.iter().cloned())
        }
    };
    command.cwd(workspace).sudo(action.sudo)
}

fn script_path(action: &PostInstallAction, workspace: &Path) -> Option<PathBuf> {
    safe_join(workspace, &action.run)
        .ok()
        .filter(|path| path.is_file())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> BundleResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o111);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> BundleResult<()> {
    Ok(())
}

fn skipped(reason: &str) -> ActionOutcome {
    ActionOutcome::Skipped {
        reason: reason.to_string(),
    }
}

fn report(action: &PostInstallAction, command: String, outcome: ActionOutcome) -> ActionReport {
    ActionReport {
        name: action.name.clone(),
        command,
        critical: action.critical,
        outcome,
    }
}
