//! Export and import of directory-tree artifacts.

use super::{ExportContext, ExportResult, ImportContext, ImportResult, import_failed, kind_dir, not_found};
use crate::archive::{self, LinkPolicy, TreeOptions};
use crate::fetch::Fetcher;
use crate::manifest::{ArtifactEntry, ArtifactSource};
use crate::workspace::safe_join;
use crate::{BundleError, BundleResult};
use std::path::{Path, PathBuf};

/// Archive format of a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteFormat {
    Tar,
    TarGz,
}

impl RemoteFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }
}

/// Format of a remote source: `options.format` wins over the URL suffix.
pub(crate) fn remote_format(entry: &ArtifactEntry, url: &str) -> Option<RemoteFormat> {
    if let Some(format) = entry.option_str("format") {
        return parse_format(format);
    }
    let path = strip_query(url);
    if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
        Some(RemoteFormat::TarGz)
    } else if path.ends_with(".tar") {
        Some(RemoteFormat::Tar)
    } else {
        None
    }
}

fn parse_format(value: &str) -> Option<RemoteFormat> {
    match value {
        "tar" => Some(RemoteFormat::Tar),
        "tar.gz" | "tgz" => Some(RemoteFormat::TarGz),
        _ => None,
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Validation shared by tree kinds: source shape, format and checksum options.
pub(crate) fn validate_source(entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
    if let Some(format) = entry.option_str("format")
        && parse_format(format).is_none()
    {
        return Err(BundleError::validation(
            format!("{field}.options.format"),
            format!("'{format}' is not one of: tar, tar.gz, tgz"),
        ));
    }

    match &entry.source {
        ArtifactSource::Local(path) if path.as_os_str().is_empty() => Err(
            BundleError::validation(format!("{field}.source"), "must not be empty"),
        ),
        ArtifactSource::Local(_) => {
            if entry.options.contains_key("sha256") || entry.options.contains_key("format") {
                return Err(BundleError::validation(
                    format!("{field}.options"),
                    "'sha256' and 'format' only apply to remote sources",
                ));
            }
            Ok(())
        }
        ArtifactSource::Remote(url) => {
            if remote_format(entry, url).is_none() {
                return Err(BundleError::validation(
                    format!("{field}.source"),
                    format!(
                        "cannot tell the archive format of '{url}'; use a .tar, .tar.gz or .tgz URL or set options.format"
                    ),
                ));
            }
            Ok(())
        }
        ArtifactSource::Registry(reference) => Err(BundleError::validation(
            format!("{field}.source"),
            format!("'{reference}' is a registry reference; {} needs a path or URL", entry.kind),
        )),
    }
}

/// Filename-safe stem derived from the artifact source.
pub(crate) fn source_stem(entry: &ArtifactEntry) -> String {
    let raw = match &entry.source {
        ArtifactSource::Local(path) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        ArtifactSource::Remote(url) => strip_query(url)
            .rsplit('/')
            .next()
            .map(|name| {
                let name = name
                    .strip_suffix(".tar.gz")
                    .or_else(|| name.strip_suffix(".tgz"))
                    .or_else(|| name.strip_suffix(".tar"))
                    .unwrap_or(name);
                name.to_string()
            }),
        ArtifactSource::Registry(reference) => Some(reference.clone()),
    };

    let raw = raw
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .or_else(|| {
            Path::new(&entry.dest)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| entry.kind.to_string());

    sanitize(&raw)
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`.
pub(crate) fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Archive a tree artifact into the staging directory.
pub(crate) fn export_tree(
    entry: &ArtifactEntry,
    ctx: &ExportContext<'_>,
    fetcher: &Fetcher,
    options: &TreeOptions,
    payload_name: &str,
) -> BundleResult<ExportResult> {
    let dir = kind_dir(ctx.staging, entry.kind)?;
    let payload = dir.join(payload_name);

    let result = match &entry.source {
        ArtifactSource::Local(path) => {
            let src = ctx.resolve(path);
            if !src.is_dir() {
                return Err(BundleError::ArtifactNotFound {
                    kind: entry.kind,
                    entry: entry.dest.clone(),
                    reason: format!("{} is not a directory", src.display()),
                });
            }
            archive::write_tree(&src, &payload, options, ctx.cancel)
        }
        ArtifactSource::Remote(url) => {
            export_remote(entry, ctx, fetcher, url, &payload, options)
        }
        ArtifactSource::Registry(reference) => Err(BundleError::ArtifactNotFound {
            kind: entry.kind,
            entry: entry.dest.clone(),
            reason: format!("registry reference '{reference}' is not a tree source"),
        }),
    };

    let stats = result.map_err(|e| {
        let _ = std::fs::remove_file(&payload);
        not_found(entry, e)
    })?;
    let size = std::fs::metadata(&payload)?.len();

    tracing::info!(
        kind = %entry.kind,
        dest = %entry.dest,
        files = stats.entries,
        bytes = size,
        "exported tree"
    );
    Ok(ExportResult {
        payload: format!("{}/{payload_name}", entry.kind),
        size,
    })
}

fn export_remote(
    entry: &ArtifactEntry,
    ctx: &ExportContext<'_>,
    fetcher: &Fetcher,
    url: &str,
    payload: &Path,
    options: &TreeOptions,
) -> BundleResult<archive::ArchiveStats> {
    let format = remote_format(entry, url).ok_or_else(|| {
        BundleError::validation("source", format!("unknown archive format for {url}"))
    })?;
    let scratch = tempfile::Builder::new()
        .prefix(".fetch-")
        .tempdir_in(ctx.staging)?;
    let download = scratch.path().join(format!("download.{}", format.extension()));
    fetcher.download(url, &download, entry.option_str("sha256"), ctx.cancel)?;

    let extracted = scratch.path().join("tree");
    archive::unpack(&download, &extracted, LinkPolicy::AllowContained, ctx.cancel)?;
    std::fs::remove_file(&download)?;

    let root = single_top_dir(&extracted)?.unwrap_or(extracted);
    archive::write_tree(&root, payload, options, ctx.cancel)
}

/// Release tarballs often wrap everything in one top-level directory.
fn single_top_dir(dir: &Path) -> BundleResult<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?;
    let (Some(first), None) = (entries.next(), entries.next()) else {
        return Ok(None);
    };
    let first = first?;
    if first.file_type()?.is_dir() {
        Ok(Some(first.path()))
    } else {
        Ok(None)
    }
}

/// Install target of a tree entry.
pub(crate) fn target(entry: &ArtifactEntry, workspace: &Path) -> BundleResult<PathBuf> {
    safe_join(workspace, &entry.dest)
}

/// Extract a tree payload and swap it into place.
///
/// The payload is extracted next to the target (same filesystem), the old
/// target is moved aside, and the new tree is renamed in. The old tree is
/// restored if the final rename fails.
pub(crate) fn import_tree(
    entry: &ArtifactEntry,
    ctx: &ImportContext<'_>,
    payload_name: &str,
) -> BundleResult<ImportResult> {
    let target = target(entry, ctx.workspace)?;
    if ctx.matches_record() && target.exists() {
        tracing::info!(kind = %entry.kind, dest = %entry.dest, "already present");
        return Ok(ImportResult::AlreadyPresent);
    }

    let payload = ctx.staging.join(entry.kind.as_str()).join(payload_name);
    swap_in(&payload, &target, ctx).map_err(|e| import_failed(entry, e))?;

    tracing::info!(kind = %entry.kind, dest = %entry.dest, "installed");
    Ok(ImportResult::Installed)
}

fn swap_in(payload: &Path, target: &Path, ctx: &ImportContext<'_>) -> BundleResult<()> {
    let parent = target
        .parent()
        .ok_or_else(|| BundleError::validation("dest", "has no parent directory"))?;
    std::fs::create_dir_all(parent)?;

    let scratch = tempfile::Builder::new()
        .prefix(".stackpack-import-")
        .tempdir_in(parent)?;
    let fresh = scratch.path().join("new");
    archive::unpack(payload, &fresh, LinkPolicy::AllowContained, ctx.cancel)?;
    ctx.cancel.check()?;

    let previous = scratch.path().join("previous");
    let had_previous = std::fs::symlink_metadata(target).is_ok();
    if had_previous {
        std::fs::rename(target, &previous)?;
    }
    if let Err(e) = std::fs::rename(&fresh, target) {
        if had_previous {
            let _ = std::fs::rename(&previous, target);
        }
        return Err(e.into());
    }
    Ok(())
}
