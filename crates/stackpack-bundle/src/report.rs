//! Install report.

use crate::manifest::{ArtifactEntry, ArtifactKind, Manifest};
use crate::{BundleResult, REPORT_FILE, STATE_DIR};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Per-artifact result of an install run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Installed,
    AlreadyPresent,
    Failed,
    NotAttempted,
}

impl ArtifactStatus {
    /// True when the artifact is in place after the run.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Installed | Self::AlreadyPresent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub kind: ArtifactKind,
    pub dest: String,
    pub status: ArtifactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one post-install action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub name: String,
    pub command: String,
    pub critical: bool,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

impl ActionReport {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Failed { .. })
    }
}

/// How far an install run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    /// Every artifact is in place and every action ran.
    Completed,
    /// An import or a critical action failed.
    Failed,
    /// The operator interrupted the run.
    Cancelled,
    /// Imports have started but the run has not finished. A saved report
    /// with this outcome was left by a process that was killed.
    InProgress,
}

/// Summary of one install run.
///
/// A report with `complete: false` means the workspace is in a partial
/// state and the install should be re-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub project: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<PathBuf>,
    pub workspace: PathBuf,
    pub outcome: InstallOutcome,
    pub complete: bool,
    pub success: bool,
    pub artifacts: Vec<ArtifactReport>,
    #[serde(default)]
    pub post_install: Vec<ActionReport>,
}

impl InstallReport {
    /// Start a report with every artifact not yet attempted.
    pub fn new(manifest: &Manifest, workspace: &Path, bundle: Option<&Path>) -> Self {
        Self {
            project: manifest.project.clone(),
            version: manifest.version.clone(),
            bundle: bundle.map(Path::to_path_buf),
            workspace: workspace.to_path_buf(),
            outcome: InstallOutcome::InProgress,
            complete: false,
            success: false,
            artifacts: manifest
                .artifacts
                .iter()
                .map(|entry| ArtifactReport {
                    kind: entry.kind,
                    dest: entry.dest.clone(),
                    status: ArtifactStatus::NotAttempted,
                    error: None,
                })
                .collect(),
            post_install: Vec::new(),
        }
    }

    /// Record the result for the artifact at `index`.
    pub fn set_artifact(&mut self, index: usize, status: ArtifactStatus, error: Option<String>) {
        if let Some(artifact) = self.artifacts.get_mut(index) {
            artifact.status = status;
            artifact.error = error;
        }
    }

    /// Status recorded for an entry.
    pub fn status_of(&self, entry: &ArtifactEntry) -> Option<ArtifactStatus> {
        self.artifacts
            .iter()
            .find(|a| a.kind == entry.kind && a.dest == entry.dest)
            .map(|a| a.status)
    }

    /// Seal the report with the run outcome.
    pub fn finish(&mut self, outcome: InstallOutcome) {
        self.outcome = outcome;
        self.complete = outcome == InstallOutcome::Completed;
        self.success = self.complete
            && self.artifacts.iter().all(|a| a.status.is_ok())
            && !self
                .post_install
                .iter()
                .any(|action| action.critical && action.failed());
    }

    /// Non-critical actions that failed.
    pub fn warnings(&self) -> impl Iterator<Item = &ActionReport> {
        self.post_install
            .iter()
            .filter(|action| !action.critical && action.failed())
    }

    /// Report file location for a workspace.
    pub fn path(workspace: &Path) -> PathBuf {
        workspace.join(STATE_DIR).join(REPORT_FILE)
    }

    /// Persist to `<workspace>/.stackpack/install-report.yaml`.
    pub fn save(&self, workspace: &Path) -> BundleResult<PathBuf> {
        let path = Self::path(workspace);
        let dir = workspace.join(STATE_DIR);
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Read the last persisted report of a workspace.
    pub fn load(workspace: &Path) -> BundleResult<Self> {
        let yaml = std::fs::read_to_string(Self::path(workspace))?;
        Ok(serde_yaml::from_str(&yaml)?)
    }
}
