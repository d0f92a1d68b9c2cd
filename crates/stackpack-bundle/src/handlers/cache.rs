//! Compilation cache handler.

use super::tree::{self, source_stem};
use super::{
    ArtifactHandler, ExportContext, ExportResult, Exporter, ImportContext, ImportResult, Importer,
    check_option_keys,
};
use crate::archive::TreeOptions;
use crate::fetch::Fetcher;
use crate::manifest::{ArtifactEntry, ArtifactKind, check_tree_dest};
use crate::{BundleError, BundleResult, CancelToken};
use std::path::Path;

const OPTIONS: &[&str] = &["compression_level", "format", "sha256"];

/// Gzip level used when the manifest does not set one.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Packs a cache directory as a gzip-compressed tar.
#[derive(Debug, Clone)]
pub struct CacheHandler {
    fetcher: Fetcher,
}

impl CacheHandler {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub(crate) fn compression_level(entry: &ArtifactEntry) -> u32 {
        entry
            .option_u64("compression_level")
            .and_then(|level| u32::try_from(level).ok())
            .unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Exporter for CacheHandler {
    fn export(&self, entry: &ArtifactEntry, ctx: &ExportContext<'_>) -> BundleResult<ExportResult> {
        let options = TreeOptions {
            excludes: None,
            compression: Some(Self::compression_level(entry)),
            subset: None,
        };
        tree::export_tree(entry, ctx, &self.fetcher, &options, &self.payload_name(entry))
    }
}

impl Importer for CacheHandler {
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

impl ArtifactHandler for CacheHandler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Cache
    }

    fn validate(&self, entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
        check_option_keys(entry, field, OPTIONS)?;
        check_compression_level(entry, field)?;
        tree::validate_source(entry, field)?;
        check_tree_dest(entry, field)
    }

    fn payload_name(&self, entry: &ArtifactEntry) -> String {
        format!("{}.tar.gz", source_stem(entry))
    }
}

pub(crate) fn check_compression_level(entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
    if let Some(value) = entry.options.get("compression_level") {
        let valid = value.as_u64().is_some_and(|level| level <= 9);
        if !valid {
            return Err(BundleError::validation(
                format!("{field}.options.compression_level"),
                "must be an integer between 0 and 9",
            ));
        }
    }
    Ok(())
}
