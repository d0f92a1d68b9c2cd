//! Deterministic tar writing and guarded extraction.
//!
//! Entries are written in sorted path order with normalised headers, so the
//! same tree always produces the same bytes. Extraction refuses entries that
//! would land outside the destination.

use crate::{BundleError, BundleResult, CancelToken};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};

/// Paths never worth shipping from a working tree.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "build",
    "bazel-*",
    "__pycache__",
];

/// How a directory tree is archived.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// Entries whose relative path or file name match are skipped with
    /// their whole subtree.
    pub excludes: Option<GlobSet>,

    /// Gzip level (0..=9); `None` writes a plain tar.
    pub compression: Option<u32>,

    /// Relative paths to keep, each with its subtree. `None` keeps everything.
    pub subset: Option<Vec<PathBuf>>,
}

/// Size summary of a written archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveStats {
    pub entries: usize,
    pub bytes: u64,
}

/// One entry of an existing archive, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

/// What extraction may create besides files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Any link entry is rejected.
    Reject,
    /// Relative symlinks that resolve inside the destination are allowed.
    AllowContained,
}

/// Compile glob patterns into an exclude set.
pub fn exclude_set<S: AsRef<str>>(patterns: &[S]) -> BundleResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.as_ref()).map_err(|e| {
            BundleError::validation("exclude", format!("invalid glob '{}': {e}", pattern.as_ref()))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| BundleError::validation("exclude", e.to_string()))
}

/// Archive the contents of `src` into `dest_file`.
pub fn write_tree(
    src: &Path,
    dest_file: &Path,
    options: &TreeOptions,
    cancel: &CancelToken,
) -> BundleResult<ArchiveStats> {
    for path in options.subset.iter().flatten() {
        if std::fs::symlink_metadata(src.join(path)).is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("subset path {} is not under {}", path.display(), src.display()),
            )
            .into());
        }
    }

    let file = BufWriter::new(File::create(dest_file)?);
    let stats = match options.compression {
        Some(level) => {
            let encoder = GzBuilder::new()
                .mtime(0)
                .operating_system(255)
                .write(file, Compression::new(level.min(9)));
            let mut builder = deterministic_builder(encoder);
            let stats = append_tree(&mut builder, src, options, cancel)?;
            builder.into_inner()?.finish()?.flush()?;
            stats
        }
        None => {
            let mut builder = deterministic_builder(file);
            let stats = append_tree(&mut builder, src, options, cancel)?;
            builder.into_inner()?.flush()?;
            stats
        }
    };

    tracing::debug!(
        src = %src.display(),
        archive = %dest_file.display(),
        entries = stats.entries,
        bytes = stats.bytes,
        "archived directory tree"
    );
    Ok(stats)
}

/// Seal a staging directory into a plain tar written to `writer`.
pub fn seal<W: Write>(src: &Path, writer: W, cancel: &CancelToken) -> BundleResult<ArchiveStats> {
    let mut builder = deterministic_builder(writer);
    let stats = append_tree(&mut builder, src, &TreeOptions::default(), cancel)?;
    builder.into_inner()?.flush()?;
    Ok(stats)
}

/// Extract `archive` into `dest`, creating it if needed.
pub fn unpack(
    archive: &Path,
    dest: &Path,
    links: LinkPolicy,
    cancel: &CancelToken,
) -> BundleResult<ArchiveStats> {
    std::fs::create_dir_all(dest)?;
    let reader = open_reader(archive)?;
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    let mut stats = ArchiveStats::default();
    for entry in tar.entries()? {
        cancel.check()?;
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        check_entry_path(&path)?;

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous | EntryType::Directory => {}
            EntryType::Symlink if links == LinkPolicy::AllowContained => {
                let target = entry
                    .link_name()?
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                check_link_target(&path, &target)?;
            }
            EntryType::GNULongName
            | EntryType::GNULongLink
            | EntryType::XHeader
            | EntryType::XGlobalHeader => continue,
            other => {
                return Err(BundleError::unsafe_entry(
                    &path,
                    format!("entry type {other:?} is not allowed"),
                ));
            }
        }

        stats.bytes += entry.header().size().unwrap_or(0);
        stats.entries += 1;
        entry.unpack_in(dest)?;
    }

    tracing::debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        entries = stats.entries,
        "extracted archive"
    );
    Ok(stats)
}

/// List the entries of an archive without extracting it.
pub fn list(archive: &Path) -> BundleResult<Vec<ArchiveEntry>> {
    let mut tar = tar::Archive::new(open_reader(archive)?);
    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        entries.push(ArchiveEntry {
            path: entry.path()?.to_string_lossy().into_owned(),
            size: entry.header().size().unwrap_or(0),
            is_dir: entry.header().entry_type().is_dir(),
        });
    }
    Ok(entries)
}

/// Read a single file out of an archive.
pub fn read_file(archive: &Path, name: &str) -> BundleResult<Option<Vec<u8>>> {
    let mut tar = tar::Archive::new(open_reader(archive)?);
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()? == Path::new(name) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}

fn deterministic_builder<W: Write>(writer: W) -> Builder<W> {
    let mut builder = Builder::new(writer);
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);
    builder
}

fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    root: &Path,
    options: &TreeOptions,
    cancel: &CancelToken,
) -> BundleResult<ArchiveStats> {
    let mut paths = Vec::new();
    walk(root, Path::new(""), options, &mut paths)?;
    paths.sort();

    let mut stats = ArchiveStats::default();
    for relative in paths {
        cancel.check()?;
        let full = root.join(&relative);
        let meta = std::fs::symlink_metadata(&full)?;

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&meta, HeaderMode::Deterministic);

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&full)?;
            check_link_target(&relative, &target)?;
            header.set_size(0);
            builder.append_link(&mut header, &relative, &target)?;
        } else if meta.is_dir() {
            header.set_size(0);
            builder.append_data(&mut header, &relative, std::io::empty())?;
        } else {
            let file = File::open(&full)?;
            stats.bytes += meta.len();
            builder.append_data(&mut header, &relative, BufReader::new(file))?;
        }
        stats.entries += 1;
    }
    Ok(stats)
}

fn walk(
    root: &Path,
    relative: &Path,
    options: &TreeOptions,
    out: &mut Vec<PathBuf>,
) -> BundleResult<()> {
    for entry in std::fs::read_dir(root.join(relative))? {
        let entry = entry?;
        let child = relative.join(entry.file_name());
        if is_excluded(options.excludes.as_ref(), &child) {
            tracing::trace!(path = %child.display(), "excluded from archive");
            continue;
        }
        if !in_subset(options.subset.as_deref(), &child) {
            continue;
        }
        let file_type = entry.file_type()?;
        out.push(child.clone());
        if file_type.is_dir() {
            walk(root, &child, options, out)?;
        }
    }
    Ok(())
}

/// Inside a kept path, or a directory leading to one.
fn in_subset(subset: Option<&[PathBuf]>, relative: &Path) -> bool {
    subset.is_none_or(|keep| {
        keep.iter()
            .any(|path| relative.starts_with(path) || path.starts_with(relative))
    })
}

fn is_excluded(excludes: Option<&GlobSet>, relative: &Path) -> bool {
    let Some(set) = excludes else {
        return false;
    };
    set.is_match(relative)
        || relative
            .file_name()
            .is_some_and(|name| set.is_match(Path::new(name)))
}

fn open_reader(archive: &Path) -> BundleResult<Box<dyn Read>> {
    let mut file = BufReader::new(File::open(archive)?);
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    let file = BufReader::new(File::open(archive)?);
    if read == 2 && magic == [0x1f, 0x8b] {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn check_entry_path(path: &Path) -> BundleResult<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(BundleError::unsafe_entry(path, "path contains '..'"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::unsafe_entry(path, "path is absolute"));
            }
        }
    }
    Ok(())
}

fn check_link_target(link: &Path, target: &Path) -> BundleResult<()> {
    let escapes = || {
        BundleError::unsafe_entry(
            link,
            format!("symlink target {} leaves the archive", target.display()),
        )
    };
    if target.is_absolute() {
        return Err(escapes());
    }

    let mut depth: i64 = link.components().count() as i64 - 1;
    for component in target.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
        if depth < 0 {
            return Err(escapes());
        }
    }
    Ok(())
}
