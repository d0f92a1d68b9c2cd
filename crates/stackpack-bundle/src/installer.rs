//! Bundle installation.
//!
//! An install run takes the workspace lock, unpacks the bundle into a
//! scratch directory under `.stackpack/`, verifies every file against
//! `checksums.yaml`, reloads the embedded manifest, and only then imports
//! artifacts in manifest order and runs the post-install actions.
//!
//! Everything up to the first import fails closed and returns an error.
//! Once importing has started the run always produces an [`InstallReport`],
//! which is also persisted in the workspace.

use crate::archive::{self, LinkPolicy};
use crate::checksum::{Checksums, strip_prefix};
use crate::command::{CommandRunner, SystemRunner};
use crate::handlers::{HandlerRegistry, ImportContext, ImportResult, Importer};
use crate::manifest::Manifest;
use crate::packer::BundlePacker;
use crate::platform::HostFacts;
use crate::post_install::{PostInstallRunner, skip_all};
use crate::report::{ArtifactStatus, InstallOutcome, InstallReport};
use crate::state::InstallState;
use crate::workspace::WorkspaceLock;
use crate::{BundleError, BundleResult, CancelToken, MANIFEST_FILE, STATE_DIR};
use std::path::Path;
use std::sync::Arc;

/// A bundle root whose content has been checked.
struct VerifiedBundle {
    manifest: Manifest,
    /// Payload checksum per manifest entry, in manifest order.
    payload_sha256: Vec<String>,
}

/// Installs bundles into workspaces.
pub struct BundleInstaller<'a> {
    registry: &'a HandlerRegistry,
    runner: Arc<dyn CommandRunner>,
    cancel: CancelToken,
    host: HostFacts,
}

impl<'a> BundleInstaller<'a> {
    #[must_use]
    pub fn new(registry: &'a HandlerRegistry) -> Self {
        Self {
            registry,
            runner: Arc::new(SystemRunner::new()),
            cancel: CancelToken::new(),
            host: HostFacts::detect(),
        }
    }

    /// Command runner used for post-install actions.
    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Host facts used to re-validate the embedded manifest.
    #[must_use]
    pub fn host(mut self, host: HostFacts) -> Self {
        self.host = host;
        self
    }

    /// Install a bundle archive into `workspace`.
    pub fn install(&self, bundle: &Path, workspace: &Path) -> BundleResult<InstallReport> {
        self.cancel.check()?;
        if !bundle.is_file() {
            return Err(BundleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Bundle not found: {}", bundle.display()),
            )));
        }

        std::fs::create_dir_all(workspace)?;
        let _lock = WorkspaceLock::acquire(workspace)?;
        tracing::info!(bundle = %bundle.display(), workspace = %workspace.display(), "installing bundle");

        let scratch = tempfile::Builder::new()
            .prefix("bundle-")
            .tempdir_in(workspace.join(STATE_DIR))?;
        archive::unpack(bundle, scratch.path(), LinkPolicy::Reject, &self.cancel)?;

        let verified = self.verify(scratch.path())?;
        Ok(self.apply(&verified, scratch.path(), workspace, Some(bundle)))
    }

    /// Install straight from a manifest without sealing a bundle.
    ///
    /// Artifacts are exported into a scratch directory and installed from
    /// there through the same verification and import steps.
    pub fn install_manifest(&self, manifest: &Manifest, workspace: &Path) -> BundleResult<InstallReport> {
        self.cancel.check()?;
        manifest.validate(self.registry)?;

        std::fs::create_dir_all(workspace)?;
        let _lock = WorkspaceLock::acquire(workspace)?;
        tracing::info!(
            project = %manifest.project,
            workspace = %workspace.display(),
            "installing from manifest"
        );

        let scratch = tempfile::Builder::new().prefix("stackpack-dev-").tempdir()?;
        BundlePacker::new(self.registry)
            .cancel(self.cancel.clone())
            .stage(manifest, scratch.path())?;

        let verified = self.verify(scratch.path())?;
        Ok(self.apply(&verified, scratch.path(), workspace, None))
    }

    /// Check an unpacked bundle before anything is imported.
    fn verify(&self, root: &Path) -> BundleResult<VerifiedBundle> {
        let checksums = Checksums::read(root)?;
        if checksums.get(MANIFEST_FILE).is_none() {
            return Err(BundleError::Integrity {
                path: MANIFEST_FILE.to_string(),
                expected: "listed in checksums".to_string(),
                actual: "missing".to_string(),
            });
        }
        checksums.verify_tree(root)?;

        let manifest = Manifest::load_with(root.join(MANIFEST_FILE), self.registry, &self.host)?;

        let mut payload_sha256 = Vec::with_capacity(manifest.artifacts.len());
        for (index, entry) in manifest.artifacts.iter().enumerate() {
            let handler = self
                .registry
                .supported(entry.kind, &format!("artifacts[{index}].kind"))?;
            let path = handler.payload_path(entry);
            let checksum = checksums.get(&path).ok_or_else(|| BundleError::MissingPayload {
                kind: entry.kind,
                entry: entry.dest.clone(),
                path: path.clone(),
            })?;
            payload_sha256.push(strip_prefix(checksum).to_string());
        }

        if manifest.platform.arch != self.host.arch {
            tracing::warn!(
                bundle = %manifest.platform,
                host = %self.host.arch,
                "bundle was packed for a different architecture"
            );
        }
        if manifest.platform.gpu.is_some() && self.host.gpu.is_none() {
            tracing::warn!(bundle = %manifest.platform, "bundle expects a GPU but none was detected");
        }

        tracing::info!(files = checksums.len(), "bundle verified");
        Ok(VerifiedBundle {
            manifest,
            payload_sha256,
        })
    }

    /// Import artifacts and run post-install actions.
    fn apply(
        &self,
        verified: &VerifiedBundle,
        root: &Path,
        workspace: &Path,
        bundle: Option<&Path>,
    ) -> InstallReport {
        let manifest = &verified.manifest;
        let mut report = InstallReport::new(manifest, workspace, bundle);
        let mut state = InstallState::load(workspace);
        let mut outcome = InstallOutcome::Completed;
        save_report(&report, workspace);

        for (index, entry) in manifest.artifacts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                outcome = InstallOutcome::Cancelled;
                break;
            }

            let result = self
                .registry
                .supported(entry.kind, &format!("artifacts[{index}].kind"))
                .and_then(|handler| {
                    let recorded = state.recorded(entry).map(str::to_string);
                    let ctx = ImportContext {
                        staging: root,
                        workspace,
                        cancel: &self.cancel,
                        payload_sha256: &verified.payload_sha256[index],
                        recorded_sha256: recorded.as_deref(),
                    };
                    handler.import(entry, &ctx)
                });

            match result {
                Ok(imported) => {
                    let status = match imported {
                        ImportResult::Installed => ArtifactStatus::Installed,
                        ImportResult::AlreadyPresent => ArtifactStatus::AlreadyPresent,
                    };
                    report.set_artifact(index, status, None);
                    state.record(entry, &verified.payload_sha256[index]);
                    save_state(&state, workspace);
                    save_report(&report, workspace);
                }
                Err(BundleError::Cancelled) => {
                    report.set_artifact(
                        index,
                        ArtifactStatus::NotAttempted,
                        Some(BundleError::Cancelled.to_string()),
                    );
                    outcome = InstallOutcome::Cancelled;
                    break;
                }
                Err(e) => {
                    tracing::error!(kind = %entry.kind, dest = %entry.dest, error = %e, "import failed");
                    report.set_artifact(index, ArtifactStatus::Failed, Some(e.to_string()));
                    state.forget(entry);
                    save_state(&state, workspace);
                    outcome = InstallOutcome::Failed;
                    break;
                }
            }
        }

        match outcome {
            InstallOutcome::Completed => {
                let run = PostInstallRunner::new(self.runner.as_ref(), workspace, &self.cancel)
                    .run_all(&manifest.post_install);
                report.post_install = run.actions;
                if run.cancelled {
                    outcome = InstallOutcome::Cancelled;
                } else if run.critical_failure {
                    outcome = InstallOutcome::Failed;
                }
            }
            InstallOutcome::Failed | InstallOutcome::InProgress => {
                report.post_install = skip_all(&manifest.post_install, workspace, "artifact import failed");
            }
            InstallOutcome::Cancelled => {
                report.post_install = skip_all(&manifest.post_install, workspace, "cancelled");
            }
        }

        report.finish(outcome);
        save_report(&report, workspace);

        if report.success {
            tracing::info!(project = %report.project, version = %report.version, "install complete");
        } else {
            tracing::warn!(outcome = ?report.outcome, "install incomplete; re-run to resume");
        }
        report
    }
}

/// Persist the report; an in-progress copy replaces any earlier result.
fn save_report(report: &InstallReport, workspace: &Path) {
    match report.save(workspace) {
        Ok(path) => tracing::debug!(report = %path.display(), outcome = ?report.outcome, "install report saved"),
        Err(e) => tracing::warn!(error = %e, "failed to save install report"),
    }
}

fn save_state(state: &InstallState, workspace: &Path) {
    if let Err(e) = state.save(workspace) {
        tracing::warn!(error = %e, "failed to save install state");
    }
}
