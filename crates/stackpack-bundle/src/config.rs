//! Tool configuration

use crate::{ArtifactKind, BundleError, BundleResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file location relative to `$HOME`.
pub const USER_CONFIG_PATH: &str = ".config/stackpack/config.toml";

/// Operator configuration shared by pack and install runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Initial log level (overridden by `RUST_LOG` and CLI flags)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Container runtime CLI used for image save/load
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Timeout for a whole remote download, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Directory `pack` writes bundles to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Manifest used when none is given on the command line
    #[serde(default = "default_manifest")]
    pub default_manifest: PathBuf,

    /// Artifact kinds refused at manifest load on this host
    #[serde(default)]
    pub disabled_kinds: Vec<ArtifactKind>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_http_timeout() -> u64 {
    600
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_manifest() -> PathBuf {
    PathBuf::from(crate::MANIFEST_FILE)
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            docker_binary: default_docker_binary(),
            http_timeout_secs: default_http_timeout(),
            output_dir: default_output_dir(),
            default_manifest: default_manifest(),
            disabled_kinds: Vec::new(),
        }
    }
}

impl DeployConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> BundleResult<Self> {
        toml::from_str(content).map_err(|e| BundleError::Config(e.to_string()))
    }

    /// Read configuration from a file.
    pub fn from_file(path: &Path) -> BundleResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BundleError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| BundleError::Config(format!("{}: {e}", path.display())))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the per-user file is used
    /// when present and defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> BundleResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match user_config_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "loading user configuration");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Download timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(USER_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn DeployConfig___default___has_expected_values() {
        let config = DeployConfig::default();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.docker_binary, "docker");
        assert_eq!(config.http_timeout(), Duration::from_secs(600));
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.default_manifest, PathBuf::from("manifest.yaml"));
        assert!(config.disabled_kinds.is_empty());
    }

    #[test]
    fn DeployConfig___from_toml___reads_disabled_kinds() {
        let config = DeployConfig::from_toml("disabled_kinds = [\"hd_map\", \"ai_model\"]\n").unwrap();

        assert_eq!(
            config.disabled_kinds,
            vec![ArtifactKind::HdMap, ArtifactKind::AiModel]
        );
    }

    #[test]
    fn DeployConfig___from_toml___rejects_unknown_kind() {
        assert!(DeployConfig::from_toml("disabled_kinds = [\"tarball\"]\n").is_err());
    }

    #[test]
    fn DeployConfig___from_toml___fills_missing_fields_with_defaults() {
        let config = DeployConfig::from_toml("docker_binary = \"podman\"\n").unwrap();

        assert_eq!(config.docker_binary, "podman");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.http_timeout_secs, 600);
    }

    #[test]
    fn DeployConfig___from_toml___empty_is_default() {
        assert_eq!(DeployConfig::from_toml("").unwrap(), DeployConfig::default());
    }

    #[test]
    fn DeployConfig___from_toml___rejects_unknown_keys() {
        let err = DeployConfig::from_toml("docker = \"podman\"\n").unwrap_err();

        assert!(matches!(err, BundleError::Config(_)));
    }

    #[test]
    fn DeployConfig___load___explicit_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\noutput_dir = \"/srv/bundles\"\nhttp_timeout_secs = 30\n",
        )
        .unwrap();

        let config = DeployConfig::load(Some(&path)).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.output_dir, PathBuf::from("/srv/bundles"));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn DeployConfig___load___missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = DeployConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();

        assert!(err.to_string().contains("absent.toml"));
    }
}
