//! Container image handler.
//!
//! Images are moved with the container runtime CLI: `pull`/`tag`/`save` at
//! pack time and `load` at install time.

use super::tree::sanitize;
use super::{
    ArtifactHandler, ExportContext, ExportResult, Exporter, ImportContext, ImportResult, Importer,
    check_option_keys, import_failed, kind_dir, not_found,
};
use crate::command::{CommandOutput, CommandRunner, ExternalCommand};
use crate::manifest::{ArtifactEntry, ArtifactKind, ArtifactSource};
use crate::{BundleError, BundleResult, CancelToken};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// An image the stack is known to ship with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnownImage {
    pub reference: &'static str,
    pub arch: &'static str,
    pub gpu: bool,
    pub description: &'static str,
}

/// Images currently recognised for this stack. Informational only; any
/// registry reference can be packed.
pub static KNOWN_IMAGES: &[KnownImage] = &[
    KnownImage {
        reference: "apolloauto/apollo:dev-x86_64-18.04-20221124_1708",
        arch: "x86_64",
        gpu: true,
        description: "development environment with CUDA runtime",
    },
    KnownImage {
        reference: "apolloauto/apollo:dev-aarch64-20.04-20231024_1054",
        arch: "aarch64",
        gpu: true,
        description: "development environment for ARM hosts",
    },
    KnownImage {
        reference: "apolloauto/apollo:runtime-x86_64-18.04",
        arch: "x86_64",
        gpu: false,
        description: "minimal runtime environment",
    },
];

/// Look up a reference in [`KNOWN_IMAGES`].
pub fn find_known(reference: &str) -> Option<&'static KnownImage> {
    KNOWN_IMAGES.iter().find(|image| image.reference == reference)
}

/// Moves container images between the local image store and bundles.
pub struct DockerImageHandler {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl DockerImageHandler {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    fn command(&self) -> ExternalCommand {
        ExternalCommand::new(self.binary.clone())
    }

    fn run(&self, command: &ExternalCommand, cancel: &CancelToken) -> BundleResult<CommandOutput> {
        self.runner.run(command, cancel)
    }

    fn image_present(&self, reference: &str, cancel: &CancelToken) -> BundleResult<bool> {
        let inspect = self
            .command()
            .args(["image", "inspect", "--format", "{{.Id}}", reference]);
        Ok(self.run(&inspect, cancel)?.success())
    }

    fn ensure_local(&self, entry: &ArtifactEntry, reference: &str, cancel: &CancelToken) -> BundleResult<()> {
        if self.image_present(reference, cancel)? {
            tracing::debug!(image = reference, "image present locally");
            return Ok(());
        }

        tracing::info!(image = reference, "pulling image");
        let pull = self.command().args(["pull", reference]);
        let output = self.run(&pull, cancel)?;
        if !output.success() {
            return Err(BundleError::ArtifactNotFound {
                kind: entry.kind,
                entry: entry.dest.clone(),
                reason: format!(
                    "image '{reference}' is not present locally and could not be pulled: {}",
                    output.stderr_tail(5)
                ),
            });
        }
        Ok(())
    }

    fn save(&self, entry: &ArtifactEntry, ctx: &ExportContext<'_>, reference: &str) -> BundleResult<ExportResult> {
        self.ensure_local(entry, reference, ctx.cancel)?;

        if reference != entry.dest {
            let tag = self.command().args(["tag", reference, entry.dest.as_str()]);
            self.run(&tag, ctx.cancel)?.into_result(&tag)?;
        }

        let dir = kind_dir(ctx.staging, entry.kind)?;
        let name = self.payload_name(entry);
        let payload = dir.join(&name);
        let save = self
            .command()
            .arg("save")
            .arg("-o")
            .arg(payload.to_string_lossy())
            .arg(entry.dest.as_str());
        if let Err(e) = self.run(&save, ctx.cancel).and_then(|o| o.into_result(&save)) {
            let _ = std::fs::remove_file(&payload);
            return Err(e);
        }

        let size = std::fs::metadata(&payload)?.len();
        Ok(ExportResult {
            payload: format!("{}/{name}", entry.kind),
            size,
        })
    }
}

impl std::fmt::Debug for DockerImageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerImageHandler")
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl Exporter for DockerImageHandler {
    fn export(&self, entry: &ArtifactEntry, ctx: &ExportContext<'_>) -> BundleResult<ExportResult> {
        let ArtifactSource::Registry(reference) = &entry.source else {
            return Err(BundleError::ArtifactNotFound {
                kind: entry.kind,
                entry: entry.dest.clone(),
                reason: format!("{} is not a registry reference", entry.source),
            });
        };
        if find_known(reference).is_none() {
            tracing::debug!(image = %reference, "image is not in the known image table");
        }

        let result = self.save(entry, ctx, reference).map_err(|e| not_found(entry, e))?;
        tracing::info!(
            kind = %entry.kind,
            dest = %entry.dest,
            bytes = result.size,
            "exported image"
        );
        Ok(result)
    }
}

impl Importer for DockerImageHandler {
    fn import(&self, entry: &ArtifactEntry, ctx: &ImportContext<'_>) -> BundleResult<ImportResult> {
        if ctx.matches_record() && self.is_installed(entry, ctx.workspace, ctx.cancel)? {
            tracing::info!(kind = %entry.kind, dest = %entry.dest, "already present");
            return Ok(ImportResult::AlreadyPresent);
        }

        let payload = ctx
            .staging
            .join(entry.kind.as_str())
            .join(self.payload_name(entry));
        let load = self
            .command()
            .args(["load", "-i"])
            .arg(payload.to_string_lossy());
        self.run(&load, ctx.cancel)
            .and_then(|output| output.into_result(&load))
            .map_err(|e| import_failed(entry, e))?;

        if !self.is_installed(entry, ctx.workspace, ctx.cancel)? {
            return Err(BundleError::Import {
                kind: entry.kind,
                entry: entry.dest.clone(),
                message: format!("image '{}' is not present after load", entry.dest),
            });
        }

        tracing::info!(kind = %entry.kind, dest = %entry.dest, "loaded image");
        Ok(ImportResult::Installed)
    }

    fn is_installed(
        &self,
        entry: &ArtifactEntry,
        _workspace: &Path,
        cancel: &CancelToken,
    ) -> BundleResult<bool> {
        self.image_present(&entry.dest, cancel)
    }
}

impl ArtifactHandler for DockerImageHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::DockerImage
    }

    fn validate(&self, entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
        check_option_keys(entry, field, &[])?;
        match &entry.source {
            ArtifactSource::Registry(reference) if is_image_reference(reference) => {}
            ArtifactSource::Registry(reference) => {
                return Err(BundleError::validation(
                    format!("{field}.source"),
                    format!("'{reference}' is not an image reference (name[:tag])"),
                ));
            }
            other => {
                return Err(BundleError::validation(
                    format!("{field}.source"),
                    format!("images are pulled from a registry; got a {}", other.describe()),
                ));
            }
        }
        if !is_image_reference(&entry.dest) {
            return Err(BundleError::validation(
                format!("{field}.dest"),
                format!("'{}' is not an image reference (name[:tag])", entry.dest),
            ));
        }
        Ok(())
    }

    fn payload_name(&self, entry: &ArtifactEntry) -> String {
        format!("{}.tar", sanitize(&entry.dest))
    }
}

/// `[registry[:port]/]name[:tag][@digest]` with the usual character set.
fn is_image_reference(reference: &str) -> bool {
    !reference.is_empty()
        && !reference.starts_with(['/', ':', '-', '.', '@'])
        && !reference.ends_with(['/', ':', '@'])
        && !reference.contains("//")
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@'))
}

#[cfg(test)]
#[path = "docker/docker_tests.rs"]
mod docker_tests;
