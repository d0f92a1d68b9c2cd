//! Bundle creation.
//!
//! The [`BundlePacker`] exports every artifact of a manifest into a staging
//! directory, records checksums, and seals the result into one plain tar
//! named by [`crate::resolve_name`].

use crate::archive;
use crate::checksum::{Checksums, sha256_file};
use crate::handlers::{ExportContext, Exporter, HandlerRegistry};
use crate::manifest::{ArtifactKind, Manifest};
use crate::{BundleResult, CancelToken, MANIFEST_FILE};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One exported artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackedArtifact {
    pub kind: ArtifactKind,
    pub dest: String,
    /// Payload path inside the bundle.
    pub payload: String,
    pub size: u64,
    pub sha256: String,
}

/// Result of a pack run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackOutput {
    pub path: PathBuf,
    pub name: String,
    pub artifacts: Vec<PackedArtifact>,
}

/// Builder for packing bundles.
///
/// # Example
///
/// ```no_run
/// use stackpack_bundle::{BundlePacker, DeployConfig, HandlerRegistry, Manifest};
///
/// let registry = HandlerRegistry::standard(&DeployConfig::default());
/// let manifest = Manifest::load("manifest.yaml")?;
/// let output = BundlePacker::new(&registry)
///     .output_dir("dist")
///     .pack(&manifest)?;
/// println!("wrote {}", output.path.display());
/// # Ok::<(), stackpack_bundle::BundleError>(())
/// ```
#[derive(Debug)]
pub struct BundlePacker<'a> {
    registry: &'a HandlerRegistry,
    output_dir: PathBuf,
    cancel: CancelToken,
}

impl<'a> BundlePacker<'a> {
    #[must_use]
    pub fn new(registry: &'a HandlerRegistry) -> Self {
        Self {
            registry,
            output_dir: PathBuf::from("."),
            cancel: CancelToken::new(),
        }
    }

    /// Directory the bundle is written to.
    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Pack a manifest into `<output_dir>/<bundle name>`.
    ///
    /// Any export failure aborts the run and no bundle file is left behind.
    pub fn pack(&self, manifest: &Manifest) -> BundleResult<PackOutput> {
        manifest.validate(self.registry)?;
        self.cancel.check()?;

        let name = manifest.bundle_name();
        tracing::info!(
            project = %manifest.project,
            version = %manifest.version,
            platform = %manifest.platform,
            artifacts = manifest.artifacts.len(),
            bundle = %name,
            "packing bundle"
        );

        std::fs::create_dir_all(&self.output_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".stackpack-staging-")
            .tempdir_in(&self.output_dir)?;
        let artifacts = self.stage(manifest, staging.path())?;

        let path = self.output_dir.join(&name);
        let mut sealed = tempfile::Builder::new()
            .prefix(".stackpack-seal-")
            .tempfile_in(&self.output_dir)?;
        let stats = {
            let mut writer = BufWriter::new(sealed.as_file_mut());
            let stats = archive::seal(staging.path(), &mut writer, &self.cancel)?;
            writer.flush()?;
            stats
        };
        sealed.as_file().sync_all()?;
        self.cancel.check()?;
        sealed.persist(&path).map_err(|e| e.error)?;

        tracing::info!(
            bundle = %path.display(),
            entries = stats.entries,
            bytes = stats.bytes,
            "bundle written"
        );
        Ok(PackOutput {
            path,
            name,
            artifacts,
        })
    }

    /// Export every artifact into `dir` and write `manifest.yaml` and
    /// `checksums.yaml` next to them, without sealing.
    pub fn stage(&self, manifest: &Manifest, dir: &Path) -> BundleResult<Vec<PackedArtifact>> {
        let ctx = ExportContext {
            base_dir: &manifest.base_dir,
            staging: dir,
            cancel: &self.cancel,
        };

        let mut artifacts = Vec::with_capacity(manifest.artifacts.len());
        for (index, entry) in manifest.artifacts.iter().enumerate() {
            self.cancel.check()?;
            let handler = self
                .registry
                .supported(entry.kind, &format!("artifacts[{index}].kind"))?;

            tracing::info!(kind = %entry.kind, source = %entry.source, dest = %entry.dest, "exporting");
            let exported = handler.export(entry, &ctx)?;
            let sha256 = sha256_file(&dir.join(&exported.payload))?;

            artifacts.push(PackedArtifact {
                kind: entry.kind,
                dest: entry.dest.clone(),
                payload: exported.payload,
                size: exported.size,
                sha256,
            });
        }

        std::fs::write(dir.join(MANIFEST_FILE), manifest.to_yaml()?)?;
        let checksums = Checksums::compute(dir)?;
        checksums.write(dir)?;
        tracing::debug!(files = checksums.len(), "staging complete");

        Ok(artifacts)
    }
}
