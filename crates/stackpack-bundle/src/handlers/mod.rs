//! Artifact handlers.
//!
//! Each artifact kind has one handler that knows how to export it into a
//! staging directory at pack time and import it into a workspace at install
//! time. Handlers are looked up through a [`HandlerRegistry`]; kinds whose
//! handler declares itself [`Support::Unsupported`] are rejected when the
//! manifest is loaded.

mod cache;
mod data;
mod docker;
mod source_code;
mod tree;
mod unsupported;

pub use cache::CacheHandler;
pub use data::{DataHandler, MapHandler, ModelHandler};
pub use docker::{DockerImageHandler, KNOWN_IMAGES, KnownImage};
pub use source_code::SourceCodeHandler;
pub use unsupported::UnsupportedHandler;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::DeployConfig;
use crate::fetch::Fetcher;
use crate::manifest::{ArtifactEntry, ArtifactKind};
use crate::{BundleError, BundleResult, CancelToken};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether a handler can actually move artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Support {
    Supported,
    Unsupported(String),
}

/// Inputs available to an export step.
#[derive(Debug, Clone, Copy)]
pub struct ExportContext<'a> {
    /// Directory local sources are resolved against.
    pub base_dir: &'a Path,
    /// Staging root; payloads go under `<staging>/<kind>/`.
    pub staging: &'a Path,
    pub cancel: &'a CancelToken,
}

impl ExportContext<'_> {
    /// Resolve a local source path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Outcome of an export step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResult {
    /// Payload location relative to the staging root.
    pub payload: String,
    /// Payload size in bytes.
    pub size: u64,
}

/// Inputs available to an import step.
#[derive(Debug, Clone, Copy)]
pub struct ImportContext<'a> {
    /// Unpacked bundle root.
    pub staging: &'a Path,
    pub workspace: &'a Path,
    pub cancel: &'a CancelToken,
    /// Checksum of the payload about to be imported.
    pub payload_sha256: &'a str,
    /// Checksum recorded by the last successful import of this entry.
    pub recorded_sha256: Option<&'a str>,
}

impl ImportContext<'_> {
    /// True when the last successful import used identical content.
    pub fn matches_record(&self) -> bool {
        self.recorded_sha256 == Some(self.payload_sha256)
    }
}

/// Outcome of an import step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportResult {
    Installed,
    AlreadyPresent,
}

/// Pack-time half of a handler.
pub trait Exporter {
    /// Fetch the artifact from `entry.source` and place its payload under
    /// the staging directory.
    ///
    /// A source that cannot be produced is [`BundleError::ArtifactNotFound`].
    fn export(&self, entry: &ArtifactEntry, ctx: &ExportContext<'_>)
    -> BundleResult<ExportResult>;
}

/// Install-time half of a handler.
pub trait Importer {
    /// Install the staged payload for `entry` into the workspace.
    ///
    /// Re-importing identical content over an intact target is a no-op that
    /// returns [`ImportResult::AlreadyPresent`].
    fn import(&self, entry: &ArtifactEntry, ctx: &ImportContext<'_>) -> BundleResult<ImportResult>;

    /// Whether the install target of `entry` currently exists.
    fn is_installed(
        &self,
        entry: &ArtifactEntry,
        workspace: &Path,
        cancel: &CancelToken,
    ) -> BundleResult<bool>;
}

/// A complete handler for one artifact kind.
pub trait ArtifactHandler: Exporter + Importer + Send + Sync {
    fn kind(&self) -> ArtifactKind;

    fn support(&self) -> Support {
        Support::Supported
    }

    /// Kind-specific validation of a manifest entry; `field` is its path
    /// (e.g., `artifacts[2]`).
    fn validate(&self, entry: &ArtifactEntry, field: &str) -> BundleResult<()>;

    /// File name of the payload inside the kind's directory.
    fn payload_name(&self, entry: &ArtifactEntry) -> String;

    /// Payload path relative to the bundle root.
    fn payload_path(&self, entry: &ArtifactEntry) -> String {
        format!("{}/{}", self.kind(), self.payload_name(entry))
    }
}

/// Handler lookup by kind.
pub struct HandlerRegistry {
    handlers: BTreeMap<ArtifactKind, Arc<dyn ArtifactHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// The standard handler set backed by real processes.
    pub fn standard(config: &DeployConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner::new()))
    }

    /// The standard handler set with a caller-supplied command runner.
    pub fn with_runner(config: &DeployConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let fetcher = Fetcher::new(config.http_timeout());
        let mut registry = Self::empty();
        registry.register(Arc::new(SourceCodeHandler::new(fetcher.clone())));
        registry.register(Arc::new(CacheHandler::new(fetcher.clone())));
        registry.register(Arc::new(DockerImageHandler::new(
            config.docker_binary.clone(),
            runner,
        )));
        registry.register(Arc::new(MapHandler::map(fetcher.clone())));
        registry.register(Arc::new(ModelHandler::model(fetcher)));
        for kind in &config.disabled_kinds {
            tracing::debug!(%kind, "artifact kind disabled by configuration");
            registry.register(Arc::new(UnsupportedHandler::new(
                *kind,
                "disabled by disabled_kinds in the configuration",
            )));
        }
        registry
    }

    /// Register a handler, replacing any previous one for its kind.
    pub fn register(&mut self, handler: Arc<dyn ArtifactHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Look up the handler for a kind, supported or not.
    pub fn get(&self, kind: ArtifactKind) -> Option<&dyn ArtifactHandler> {
        self.handlers.get(&kind).map(|handler| handler.as_ref())
    }

    /// Look up a handler that can actually move artifacts of `kind`.
    ///
    /// `field` is the manifest path reported when it cannot.
    pub fn supported(&self, kind: ArtifactKind, field: &str) -> BundleResult<&dyn ArtifactHandler> {
        let handler = self
            .get(kind)
            .ok_or_else(|| BundleError::UnsupportedKind {
                field: field.to_string(),
                kind,
                reason: "no handler registered".to_string(),
            })?;
        match handler.support() {
            Support::Supported => Ok(handler),
            Support::Unsupported(reason) => Err(BundleError::UnsupportedKind {
                field: field.to_string(),
                kind,
                reason,
            }),
        }
    }

    /// Registered kinds with their support status.
    pub fn kinds(&self) -> Vec<(ArtifactKind, Support)> {
        self.handlers
            .iter()
            .map(|(kind, handler)| (*kind, handler.support()))
            .collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reject option keys a handler does not understand.
pub(crate) fn check_option_keys(
    entry: &ArtifactEntry,
    field: &str,
    allowed: &[&str],
) -> BundleResult<()> {
    for key in entry.options.keys() {
        if !allowed.contains(&key.as_str()) {
            let expected = if allowed.is_empty() {
                "none".to_string()
            } else {
                allowed.join(", ")
            };
            return Err(BundleError::validation(
                format!("{field}.options.{key}"),
                format!("unknown option for {}; expected: {expected}", entry.kind),
            ));
        }
    }
    Ok(())
}

/// Ensure `<staging>/<kind>/` exists and return it.
pub(crate) fn kind_dir(staging: &Path, kind: ArtifactKind) -> BundleResult<PathBuf> {
    let dir = staging.join(kind.as_str());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Map an error raised while producing an artifact to `ArtifactNotFound`,
/// leaving cancellation and integrity failures untouched.
pub(crate) fn not_found(entry: &ArtifactEntry, err: BundleError) -> BundleError {
    match err {
        BundleError::Cancelled
        | BundleError::Integrity { .. }
        | BundleError::ArtifactNotFound { .. } => err,
        other => BundleError::ArtifactNotFound {
            kind: entry.kind,
            entry: entry.dest.clone(),
            reason: other.to_string(),
        },
    }
}

/// Map an error raised while importing an artifact to `Import`.
pub(crate) fn import_failed(entry: &ArtifactEntry, err: BundleError) -> BundleError {
    match err {
        BundleError::Cancelled | BundleError::Import { .. } => err,
        other => BundleError::Import {
            kind: entry.kind,
            entry: entry.dest.clone(),
            message: other.to_string(),
        },
    }
}
