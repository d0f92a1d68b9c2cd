//! Map and model data handler.
//!
//! HD maps and model weights are large directory trees that are shipped
//! the same way as a cache: one gzip-compressed tar per entry. A `subset`
//! option narrows the export to selected regions or model variants.

use super::cache::{CacheHandler, check_compression_level};
use super::tree::{self, source_stem};
use super::{
    ArtifactHandler, ExportContext, ExportResult, Exporter, ImportContext, ImportResult, Importer,
    check_option_keys,
};
use crate::archive::TreeOptions;
use crate::fetch::Fetcher;
use crate::manifest::{ArtifactEntry, ArtifactKind, check_tree_dest};
use crate::workspace::check_relative;
use crate::{BundleError, BundleResult, CancelToken};
use std::path::{Component, Path, PathBuf};

const OPTIONS: &[&str] = &["subset", "compression_level", "format", "sha256"];

/// Packs map or model data as a gzip-compressed tar.
#[derive(Debug, Clone)]
pub struct DataHandler {
    kind: ArtifactKind,
    fetcher: Fetcher,
}

/// Handler for `hd_map` entries.
pub type MapHandler = DataHandler;

/// Handler for `ai_model` entries.
pub type ModelHandler = DataHandler;

impl DataHandler {
    /// Handler for HD map directories.
    pub fn map(fetcher: Fetcher) -> Self {
        Self {
            kind: ArtifactKind::HdMap,
            fetcher,
        }
    }

    /// Handler for model weight directories.
    pub fn model(fetcher: Fetcher) -> Self {
        Self {
            kind: ArtifactKind::AiModel,
            fetcher,
        }
    }

    fn subset(entry: &ArtifactEntry) -> Option<Vec<PathBuf>> {
        entry.options.get("subset")?;
        Some(
            entry
                .option_str_list("subset")
                .iter()
                .map(|path| {
                    Path::new(path)
                        .components()
                        .filter(|c| matches!(c, Component::Normal(_)))
                        .collect()
                })
                .collect(),
        )
    }
}

impl Exporter for DataHandler {
    fn export(&self, entry: &ArtifactEntry, ctx: &ExportContext<'_>) -> BundleResult<ExportResult> {
        let options = TreeOptions {
            excludes: None,
            compression: Some(CacheHandler::compression_level(entry)),
            subset: Self::subset(entry),
        };
        tree::export_tree(entry, ctx, &self.fetcher, &options, &self.payload_name(entry))
    }
}

impl Importer for DataHandler {
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

impl ArtifactHandler for DataHandler {
    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn validate(&self, entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
        check_option_keys(entry, field, OPTIONS)?;
        check_compression_level(entry, field)?;
        if let Some(value) = entry.options.get("subset") {
            let items = value
                .as_sequence()
                .filter(|items| !items.is_empty() && items.iter().all(|item| item.is_string()))
                .ok_or_else(|| {
                    BundleError::validation(
                        format!("{field}.options.subset"),
                        "must be a non-empty list of relative paths",
                    )
                })?;
            for (index, item) in items.iter().enumerate() {
                let path = item.as_str().unwrap_or_default();
                check_relative(&format!("{field}.options.subset[{index}]"), path)?;
            }
        }
        tree::validate_source(entry, field)?;
        check_tree_dest(entry, field)
    }

    fn payload_name(&self, entry: &ArtifactEntry) -> String {
        format!("{}.tar.gz", source_stem(entry))
    }
}
