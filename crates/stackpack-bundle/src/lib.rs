//! Manifest-driven release bundles for stackpack
//!
//! This crate packs the artifacts of a software stack (source trees,
//! container images, compiled caches) into one self-describing tar on a
//! build host, and installs that tar into a workspace on a target host.
//!
//! # Bundle Structure
//!
//! ```text
//! demo_1.0.0_linux_x86_64_nogpu.tar
//! ├── manifest.yaml              # the manifest, platform tags resolved
//! ├── checksums.yaml             # sha256 of every other file
//! ├── source_code/
//! │   └── src.tar
//! ├── cache/
//! │   └── cache.tar.gz
//! └── docker_image/
//!     └── app_1.0.tar            # `docker save` output
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stackpack_bundle::{BundleInstaller, BundlePacker, DeployConfig, HandlerRegistry, Manifest};
//! use std::path::Path;
//!
//! let registry = HandlerRegistry::standard(&DeployConfig::default());
//! let manifest = Manifest::load("manifest.yaml")?;
//!
//! let output = BundlePacker::new(&registry).output_dir("dist").pack(&manifest)?;
//!
//! let report = BundleInstaller::new(&registry).install(&output.path, Path::new("ws"))?;
//! assert!(report.success);
//! # Ok::<(), stackpack_bundle::BundleError>(())
//! ```

mod cancel;
mod config;
mod error;
mod manifest;
mod platform;

pub mod archive;
pub mod checksum;
pub mod command;
pub mod fetch;
pub mod handlers;
pub mod installer;
pub mod packer;
pub mod post_install;
pub mod report;
pub mod state;
pub mod workspace;

pub use cancel::CancelToken;
pub use checksum::Checksums;
pub use command::{CommandOutput, CommandRunner, ExternalCommand, SystemRunner};
pub use config::{DeployConfig, USER_CONFIG_PATH};
pub use error::BundleError;
pub use handlers::{HandlerRegistry, KNOWN_IMAGES, KnownImage, Support};
pub use installer::BundleInstaller;
pub use manifest::{ArtifactEntry, ArtifactKind, ArtifactOptions, ArtifactSource, Manifest, PostInstallAction};
pub use packer::{BundlePacker, PackOutput, PackedArtifact};
pub use platform::{AUTO, HostFacts, NO_GPU_TAG, Platform, resolve_name};
pub use report::{ActionOutcome, ActionReport, ArtifactReport, ArtifactStatus, InstallOutcome, InstallReport};

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// Bundle file extension.
pub const BUNDLE_EXTENSION: &str = "tar";

/// Manifest file name within the bundle.
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Checksum file name within the bundle.
pub const CHECKSUMS_FILE: &str = "checksums.yaml";

/// Per-workspace state directory.
pub const STATE_DIR: &str = ".stackpack";

/// Lock file inside [`STATE_DIR`].
pub const LOCK_FILE: &str = "lock";

/// Install state file inside [`STATE_DIR`].
pub const STATE_FILE: &str = "state.yaml";

/// Install report file inside [`STATE_DIR`].
pub const REPORT_FILE: &str = "install-report.yaml";
