//! Source tree handler.

use super::tree::{self, source_stem};
use super::{
    ArtifactHandler, ExportContext, ExportResult, Exporter, ImportContext, ImportResult, Importer,
    check_option_keys,
};
use crate::archive::{DEFAULT_EXCLUDES, TreeOptions, exclude_set};
use crate::fetch::Fetcher;
use crate::manifest::{ArtifactEntry, ArtifactKind, check_tree_dest};
use crate::{BundleError, BundleResult, CancelToken};
use std::path::Path;

const OPTIONS: &[&str] = &["exclude", "format", "sha256"];

/// Packs a working tree as an uncompressed tar, without version-control
/// metadata or build output.
#[derive(Debug, Clone)]
pub struct SourceCodeHandler {
    fetcher: Fetcher,
}

impl SourceCodeHandler {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    fn tree_options(entry: &ArtifactEntry) -> BundleResult<TreeOptions> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        patterns.extend(entry.option_str_list("exclude"));
        Ok(TreeOptions {
            excludes: Some(exclude_set(&patterns)?),
            compression: None,
            subset: None,
        })
    }
}

impl Exporter for SourceCodeHandler {
    fn export(&self, entry: &ArtifactEntry, ctx: &ExportContext<'_>) -> BundleResult<ExportResult> {
        let options = Self::tree_options(entry)?;
        tree::export_tree(entry, ctx, &self.fetcher, &options, &self.payload_name(entry))
    }
}

impl Importer for SourceCodeHandler {
    fn import(&self, entry: &ArtifactEntry, ctx: &ImportContext<'_>) -> BundleResult<ImportResult> {
        tree::import_tree(entry, ctx, &self.payload_name(entry))
    }

    fn is_installed(
        &self,
        entry: &ArtifactEntry,
        workspace: &Path,
        _cancel: &CancelToken,
    ) -> BundleResult<bool> {
        Ok(tree::target(entry, workspace)?.is_dir())
    }
}

impl ArtifactHandler for SourceCodeHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::SourceCode
    }

    fn validate(&self, entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
        check_option_keys(entry, field, OPTIONS)?;
        if let Some(value) = entry.options.get("exclude") {
            let valid = value
                .as_sequence()
                .is_some_and(|items| items.iter().all(|item| item.is_string()));
            if !valid {
                return Err(BundleError::validation(
                    format!("{field}.options.exclude"),
                    "must be a list of glob patterns",
                ));
            }
            exclude_set(&entry.option_str_list("exclude")).map_err(|e| match e {
                BundleError::Validation { message, .. } => {
                    BundleError::validation(format!("{field}.options.exclude"), message)
                }
                other => other,
            })?;
        }
        tree::validate_source(entry, field)?;
        check_tree_dest(entry, field)
    }

    fn payload_name(&self, entry: &ArtifactEntry) -> String {
        format!("{}.tar", source_stem(entry))
    }
}
