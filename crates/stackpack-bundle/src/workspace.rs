//! Workspace scoping: exclusive lock and path guards.

use crate::{BundleError, BundleResult, LOCK_FILE, STATE_DIR};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

/// Exclusive hold on a workspace for one run.
///
/// The lock file is created with `create_new` and holds the owner's PID, so
/// a second run against the same workspace fails with
/// [`BundleError::WorkspaceBusy`]. Dropping the guard removes the file. A
/// lock whose owner is no longer running (killed, or forced out by a second
/// interrupt) is reclaimed.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire the lock, creating the workspace and state directory if needed.
    pub fn acquire(workspace: &Path) -> BundleResult<Self> {
        let state_dir = workspace.join(STATE_DIR);
        std::fs::create_dir_all(&state_dir)?;
        let path = state_dir.join(LOCK_FILE);

        let created = match create_lock(&path) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists && reclaim_stale(&path) => {
                create_lock(&path)
            }
            other => other,
        };
        let mut file = match created {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BundleError::WorkspaceBusy(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!(lock = %path.display(), "workspace lock acquired");
        Ok(Self { path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_lock(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Remove a lock left by a process that no longer runs.
///
/// Unreadable or foreign content counts as held.
fn reclaim_stale(path: &Path) -> bool {
    let Some(pid) = std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok())
    else {
        return false;
    };
    if process_alive(pid) {
        return false;
    }

    tracing::warn!(lock = %path.display(), pid, "reclaiming stale workspace lock");
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(lock = %path.display(), error = %e, "failed to remove stale lock");
            false
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release workspace lock");
        } else {
            tracing::debug!(lock = %self.path.display(), "workspace lock released");
        }
    }
}

/// Check that `path` is a non-empty relative path that stays inside its root.
///
/// `field` names the manifest field in the resulting error.
pub fn check_relative(field: &str, path: &str) -> BundleResult<()> {
    if path.trim().is_empty() {
        return Err(BundleError::validation(field, "must not be empty"));
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(BundleError::validation(
            field,
            format!("'{path}' must be relative to the workspace"),
        ));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(BundleError::validation(
                    field,
                    format!("'{path}' must not contain '..'"),
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::validation(
                    field,
                    format!("'{path}' must be relative to the workspace"),
                ));
            }
        }
    }
    if !candidate
        .components()
        .any(|c| matches!(c, Component::Normal(_)))
    {
        return Err(BundleError::validation(
            field,
            format!("'{path}' does not name anything inside the workspace"),
        ));
    }
    Ok(())
}

/// Join a relative path onto `root`, refusing anything that would escape it.
pub fn safe_join(root: &Path, relative: &str) -> BundleResult<PathBuf> {
    check_relative("path", relative)?;
    Ok(root.join(relative))
}
