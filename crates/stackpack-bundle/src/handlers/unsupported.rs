//! Placeholder for kinds without an implementation.

use super::{
    ArtifactHandler, ExportContext, ExportResult, Exporter, ImportContext, ImportResult, Importer,
    Support,
};
use crate::manifest::{ArtifactEntry, ArtifactKind};
use crate::{BundleError, BundleResult, CancelToken};
use std::path::Path;

/// Declares a kind as recognised but not implemented.
///
/// The registry rejects manifests that use it at load time; the export and
/// import paths fail loudly in case anything bypasses that check.
#[derive(Debug, Clone)]
pub struct UnsupportedHandler {
    kind: ArtifactKind,
    reason: String,
}

impl UnsupportedHandler {
    pub fn new(kind: ArtifactKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    fn error(&self, field: &str) -> BundleError {
        BundleError::UnsupportedKind {
            field: field.to_string(),
            kind: self.kind,
            reason: self.reason.clone(),
        }
    }
}

impl Exporter for UnsupportedHandler {
    fn export(&self, entry: &ArtifactEntry, _ctx: &ExportContext<'_>) -> BundleResult<ExportResult> {
        Err(self.error(&entry.label()))
    }
}

impl Importer for UnsupportedHandler {
    fn import(&self, entry: &ArtifactEntry, _ctx: &ImportContext<'_>) -> BundleResult<ImportResult> {
        Err(self.error(&entry.label()))
    }

    fn is_installed(
        &self,
        _entry: &ArtifactEntry,
        _workspace: &Path,
        _cancel: &CancelToken,
    ) -> BundleResult<bool> {
        Ok(false)
    }
}

impl ArtifactHandler for UnsupportedHandler {
    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn support(&self) -> Support {
        Support::Unsupported(self.reason.clone())
    }

    fn validate(&self, _entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
        Err(self.error(&format!("{field}.kind")))
    }

    fn payload_name(&self, entry: &ArtifactEntry) -> String {
        super::tree::sanitize(&entry.dest)
    }
}
