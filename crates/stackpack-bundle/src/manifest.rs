//! Manifest schema for release bundles.
//!
//! The manifest declares the project identity, the target platform, the
//! ordered list of artifacts and the post-install actions. It is parsed in
//! two stages: a loose [`ManifestDocument`] that tolerates missing fields,
//! then a checked conversion into [`Manifest`] that reports the exact field
//! path of the first problem. A manifest either fully validates or is
//! rejected; there is no lenient mode.

use crate::config::DeployConfig;
use crate::handlers::HandlerRegistry;
use crate::platform::{HostFacts, Platform};
use crate::workspace::check_relative;
use crate::{BundleError, BundleResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind-specific options attached to an artifact entry.
pub type ArtifactOptions = BTreeMap<String, serde_yaml::Value>;

/// Recognised artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Working tree of the project sources.
    SourceCode,
    /// Container image saved from / loaded into the local image store.
    DockerImage,
    /// Compilation cache directory.
    Cache,
    /// HD map data.
    HdMap,
    /// AI model data.
    AiModel,
}

impl ArtifactKind {
    /// Manifest spelling of the kind, also used as its bundle directory.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceCode => "source_code",
            Self::DockerImage => "docker_image",
            Self::Cache => "cache",
            Self::HdMap => "hd_map",
            Self::AiModel => "ai_model",
        }
    }

    /// Parse a kind from its manifest spelling.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.as_str() == s)
    }

    /// True for kinds installed as a directory under the workspace.
    #[must_use]
    pub fn is_tree(&self) -> bool {
        !matches!(self, Self::DockerImage)
    }

    /// All recognised kinds.
    #[must_use]
    pub fn all() -> &'static [ArtifactKind] {
        &[
            Self::SourceCode,
            Self::DockerImage,
            Self::Cache,
            Self::HdMap,
            Self::AiModel,
        ]
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an artifact is fetched from at pack time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Path on the packing host, relative to the manifest directory.
    Local(PathBuf),
    /// `http://` or `https://` URL of an archive.
    Remote(String),
    /// Container registry reference (`name:tag`).
    Registry(String),
}

impl ArtifactSource {
    /// Classify a raw `source` string for the given kind.
    #[must_use]
    pub fn classify(kind: ArtifactKind, raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Remote(raw.to_string())
        } else if kind == ArtifactKind::DockerImage {
            Self::Registry(raw.strip_prefix("docker://").unwrap_or(raw).to_string())
        } else {
            Self::Local(PathBuf::from(raw))
        }
    }

    /// Short label for logs and errors.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Local(_) => "local path",
            Self::Remote(_) => "remote URL",
            Self::Registry(_) => "registry reference",
        }
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
            Self::Registry(reference) => f.write_str(reference),
        }
    }
}

impl Serialize for ArtifactSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One declared artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    pub source: ArtifactSource,

    /// Relative install path, or the image `name:tag` for container images.
    pub dest: String,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: ArtifactOptions,
}

impl ArtifactEntry {
    /// Identity used in logs and errors (e.g., "cache -> cache").
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} -> {}", self.kind, self.dest)
    }

    /// Read a string option.
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(serde_yaml::Value::as_str)
    }

    /// Read an unsigned integer option.
    #[must_use]
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(serde_yaml::Value::as_u64)
    }

    /// Read a list-of-strings option; non-string items are ignored.
    #[must_use]
    pub fn option_str_list(&self, key: &str) -> Vec<String> {
        self.options
            .get(key)
            .and_then(serde_yaml::Value::as_sequence)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_yaml::Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An opaque action run after every artifact is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostInstallAction {
    pub name: String,

    /// Script path relative to the workspace, or a shell command.
    pub run: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// A failing critical action stops the remaining actions.
    pub critical: bool,

    pub sudo: bool,
}

/// Validated manifest.
///
/// Packer and installer only ever borrow it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub project: String,
    pub version: String,
    pub platform: Platform,

    /// Installed in this order.
    pub artifacts: Vec<ArtifactEntry>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_install: Vec<PostInstallAction>,

    /// Directory local sources are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Loosely typed manifest as written by operators.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
    pub project: Option<String>,
    pub version: Option<String>,
    pub platform: Option<PlatformDocument>,
    #[serde(default)]
    pub artifacts: Vec<EntryDocument>,
    #[serde(default)]
    pub post_install: Vec<ActionDocument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformDocument {
    pub os: Option<String>,
    pub arch: Option<String>,
    #[serde(default)]
    pub gpu: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryDocument {
    pub kind: Option<String>,
    pub source: Option<String>,
    pub dest: Option<String>,
    #[serde(default)]
    pub options: ArtifactOptions,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ActionDocument {
    /// Shorthand: a script path or command, critical, no arguments.
    Shorthand(String),
    Full {
        name: Option<String>,
        run: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        interpreter: Option<String>,
        critical: Option<bool>,
        sudo: Option<bool>,
    },
}

impl Manifest {
    /// Load and validate a manifest file with the default handler set,
    /// resolving `auto` platform tags against this host.
    pub fn load<P: AsRef<Path>>(path: P) -> BundleResult<Self> {
        let registry = HandlerRegistry::standard(&DeployConfig::default());
        Self::load_with(path, &registry, &HostFacts::detect())
    }

    /// Load and validate a manifest file against an explicit registry.
    pub fn load_with<P: AsRef<Path>>(
        path: P,
        registry: &HandlerRegistry,
        host: &HostFacts,
    ) -> BundleResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            BundleError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read manifest {}: {e}", path.display()),
            ))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let manifest = Self::from_yaml(&yaml, &base_dir, registry, host)?;
        tracing::debug!(
            path = %path.display(),
            project = %manifest.project,
            artifacts = manifest.artifacts.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Parse and validate manifest YAML.
    pub fn from_yaml(
        yaml: &str,
        base_dir: &Path,
        registry: &HandlerRegistry,
        host: &HostFacts,
    ) -> BundleResult<Self> {
        let document: ManifestDocument = serde_yaml::from_str(yaml)?;
        Self::from_document(document, base_dir, registry, host)
    }

    /// Convert a parsed document, then validate the result.
    pub fn from_document(
        document: ManifestDocument,
        base_dir: &Path,
        registry: &HandlerRegistry,
        host: &HostFacts,
    ) -> BundleResult<Self> {
        let project = required(document.project, "project")?;
        let version = required(document.version, "version")?;

        let platform_doc = document
            .platform
            .ok_or_else(|| BundleError::validation("platform", "is required"))?;
        let platform = Platform {
            os: required(platform_doc.os, "platform.os")?,
            arch: required(platform_doc.arch, "platform.arch")?,
            gpu: platform_doc
                .gpu
                .filter(|gpu| !matches!(gpu.to_ascii_lowercase().as_str(), "none" | "cpu" | "")),
        }
        .resolve(host);

        let mut artifacts = Vec::with_capacity(document.artifacts.len());
        for (index, entry) in document.artifacts.into_iter().enumerate() {
            let field = format!("artifacts[{index}]");
            let raw_kind = required(entry.kind, &format!("{field}.kind"))?;
            let kind = ArtifactKind::parse(&raw_kind).ok_or_else(|| {
                BundleError::validation(
                    format!("{field}.kind"),
                    format!(
                        "unknown kind '{raw_kind}'; expected one of {}",
                        ArtifactKind::all()
                            .iter()
                            .map(ArtifactKind::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
            })?;
            let raw_source = required(entry.source, &format!("{field}.source"))?;
            let dest = required(entry.dest, &format!("{field}.dest"))?;

            artifacts.push(ArtifactEntry {
                kind,
                source: ArtifactSource::classify(kind, &raw_source),
                dest,
                options: entry.options,
            });
        }

        let mut post_install = Vec::with_capacity(document.post_install.len());
        for (index, action) in document.post_install.into_iter().enumerate() {
            post_install.push(convert_action(action, index)?);
        }

        let manifest = Self {
            project,
            version,
            platform,
            artifacts,
            post_install,
            base_dir: base_dir.to_path_buf(),
        };
        manifest.validate(registry)?;
        Ok(manifest)
    }

    /// Validate the manifest against a handler registry.
    pub fn validate(&self, registry: &HandlerRegistry) -> BundleResult<()> {
        if self.project.is_empty() {
            return Err(BundleError::validation("project", "must not be empty"));
        }
        if !self
            .project
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
        {
            return Err(BundleError::validation(
                "project",
                format!(
                    "'{}' may only contain letters, digits, '-', '.' and '_'",
                    self.project
                ),
            ));
        }

        if !is_semver(&self.version) {
            return Err(BundleError::validation(
                "version",
                format!(
                    "'{}' is not a semantic version (e.g., 1.0.0)",
                    self.version
                ),
            ));
        }

        self.platform.validate("platform")?;

        let mut dests = HashSet::new();
        let mut payloads = HashSet::new();
        let mut trees: Vec<(usize, PathBuf)> = Vec::new();
        for (index, entry) in self.artifacts.iter().enumerate() {
            let field = format!("artifacts[{index}]");
            let handler = registry.supported(entry.kind, &format!("{field}.kind"))?;
            handler.validate(entry, &field)?;

            if !dests.insert((entry.kind, entry.dest.as_str())) {
                return Err(BundleError::validation(
                    format!("{field}.dest"),
                    format!("duplicate dest '{}' for kind {}", entry.dest, entry.kind),
                ));
            }
            if entry.kind.is_tree() {
                let target = normalized(&entry.dest);
                if let Some((other, _)) = trees
                    .iter()
                    .find(|(_, prev)| prev.starts_with(&target) || target.starts_with(prev))
                {
                    return Err(BundleError::validation(
                        format!("{field}.dest"),
                        format!(
                            "dest '{}' overlaps artifacts[{other}].dest '{}'",
                            entry.dest, self.artifacts[*other].dest
                        ),
                    ));
                }
                trees.push((index, target));
            }
            if !payloads.insert((entry.kind, handler.payload_name(entry))) {
                return Err(BundleError::validation(
                    format!("{field}.source"),
                    format!(
                        "another {} entry already stages a payload named '{}'",
                        entry.kind,
                        handler.payload_name(entry)
                    ),
                ));
            }
        }

        for (index, action) in self.post_install.iter().enumerate() {
            let field = format!("post_install[{index}]");
            if action.run.trim().is_empty() {
                return Err(BundleError::validation(
                    format!("{field}.run"),
                    "must not be empty",
                ));
            }
            if action.interpreter.as_deref().is_some_and(str::is_empty) {
                return Err(BundleError::validation(
                    format!("{field}.interpreter"),
                    "must not be empty when set",
                ));
            }
        }

        Ok(())
    }

    /// Resolve a local source path against the manifest directory.
    #[must_use]
    pub fn resolve_local(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Canonical bundle file name for this manifest.
    #[must_use]
    pub fn bundle_name(&self) -> String {
        crate::resolve_name(&self.project, &self.version, &self.platform)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> BundleResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn required(value: Option<String>, field: &str) -> BundleResult<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(BundleError::validation(field, "must not be empty")),
        None => Err(BundleError::validation(field, "is required")),
    }
}

fn convert_action(action: ActionDocument, index: usize) -> BundleResult<PostInstallAction> {
    let field = format!("post_install[{index}]");
    match action {
        ActionDocument::Shorthand(run) => Ok(PostInstallAction {
            name: run.clone(),
            run,
            args: Vec::new(),
            interpreter: None,
            critical: true,
            sudo: false,
        }),
        ActionDocument::Full {
            name,
            run,
            args,
            interpreter,
            critical,
            sudo,
        } => {
            let run = required(run, &format!("{field}.run"))?;
            Ok(PostInstallAction {
                name: name.unwrap_or_else(|| run.clone()),
                run,
                args,
                interpreter,
                critical: critical.unwrap_or(true),
                sudo: sudo.unwrap_or(false),
            })
        }
    }
}

/// `MAJOR.MINOR.PATCH` with optional `-pre` and `+build` suffixes.
fn is_semver(version: &str) -> bool {
    let (rest, build) = match version.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (version, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let numbers: Vec<&str> = core.split('.').collect();
    let core_ok = numbers.len() == 3
        && numbers
            .iter()
            .all(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));

    let suffix_ok = |s: Option<&str>| {
        s.is_none_or(|s| {
            !s.is_empty()
                && s.split('.').all(|part| {
                    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                })
        })
    };

    core_ok && suffix_ok(pre) && suffix_ok(build)
}

/// Shared check for install destinations that are paths under the workspace.
/// Workspace-relative dest reduced to its named components.
fn normalized(dest: &str) -> PathBuf {
    Path::new(dest)
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect()
}

pub(crate) fn check_tree_dest(entry: &ArtifactEntry, field: &str) -> BundleResult<()> {
    let field = format!("{field}.dest");
    check_relative(&field, &entry.dest)?;
    let first = Path::new(&entry.dest)
        .components()
        .find(|c| matches!(c, std::path::Component::Normal(_)));
    if first.is_some_and(|c| c.as_os_str() == crate::STATE_DIR) {
        return Err(BundleError::validation(
            field,
            format!("'{}' is reserved for install state", crate::STATE_DIR),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "manifest/manifest_tests.rs"]
mod manifest_tests;
