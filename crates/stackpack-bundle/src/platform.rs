//! Platform tags and canonical bundle naming.

use crate::{BUNDLE_EXTENSION, BundleError, BundleResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Placeholder value that asks for the host's own value at load time.
pub const AUTO: &str = "auto";

/// GPU tag used in bundle names when no GPU is declared.
pub const NO_GPU_TAG: &str = "nogpu";

const NO_GPU_VALUES: &[&str] = &["none", "cpu", ""];

/// Target platform of a bundle.
///
/// Tags are lowercase tokens. `os` and `gpu` never contain `_`, which keeps
/// [`resolve_name`] injective even though `arch` values such as `x86_64` do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system tag (e.g., "linux", "ubuntu22.04").
    pub os: String,

    /// CPU architecture tag (e.g., "x86_64", "aarch64").
    pub arch: String,

    /// GPU vendor tag (e.g., "nvidia"), `None` for CPU-only targets.
    #[serde(
        default,
        serialize_with = "serialize_gpu",
        deserialize_with = "deserialize_gpu"
    )]
    pub gpu: Option<String>,
}

impl Platform {
    /// Create a platform from explicit tags.
    #[must_use]
    pub fn new(os: &str, arch: &str, gpu: Option<&str>) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            gpu: gpu.map(str::to_string),
        }
    }

    /// Detect the platform of the current host.
    #[must_use]
    pub fn current() -> Self {
        let facts = HostFacts::detect();
        Self {
            os: facts.os,
            arch: facts.arch,
            gpu: facts.gpu,
        }
    }

    /// Replace `auto` tags with the host's values and normalise case.
    #[must_use]
    pub fn resolve(&self, host: &HostFacts) -> Self {
        let os = if self.os.eq_ignore_ascii_case(AUTO) {
            host.os.clone()
        } else {
            self.os.to_ascii_lowercase()
        };
        let arch = if self.arch.eq_ignore_ascii_case(AUTO) {
            host.arch.clone()
        } else {
            self.arch.to_ascii_lowercase()
        };
        let gpu = match self.gpu.as_deref() {
            Some(tag) if tag.eq_ignore_ascii_case(AUTO) => host.gpu.clone(),
            Some(tag) => Some(tag.to_ascii_lowercase()),
            None => None,
        };

        Self { os, arch, gpu }
    }

    /// Tag used for the GPU slot of a bundle name.
    #[must_use]
    pub fn gpu_tag(&self) -> &str {
        self.gpu.as_deref().unwrap_or(NO_GPU_TAG)
    }

    /// Check the tags are concrete, non-empty and filename safe.
    ///
    /// `field` is the manifest path of the platform block, used in errors.
    pub fn validate(&self, field: &str) -> BundleResult<()> {
        check_tag(&format!("{field}.os"), &self.os, false)?;
        check_tag(&format!("{field}.arch"), &self.arch, true)?;
        if let Some(gpu) = &self.gpu {
            check_tag(&format!("{field}.gpu"), gpu, false)?;
            if gpu == NO_GPU_TAG {
                return Err(BundleError::validation(
                    format!("{field}.gpu"),
                    format!("'{NO_GPU_TAG}' is reserved; use 'none' for CPU-only targets"),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.os, self.arch, self.gpu_tag())
    }
}

/// Facts about the host used to resolve `auto` tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub os: String,
    pub arch: String,
    pub gpu: Option<String>,
}

impl HostFacts {
    /// Detect facts about the running host.
    #[must_use]
    pub fn detect() -> Self {
        let gpu = if Path::new("/proc/driver/nvidia/version").exists() {
            Some("nvidia".to_string())
        } else {
            None
        };

        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            gpu,
        }
    }
}

/// Compute the canonical bundle file name.
///
/// Format: `{project}_{version}_{os}_{arch}_{gpu-or-"nogpu"}.tar`.
///
/// # Example
///
/// ```
/// use stackpack_bundle::{Platform, resolve_name};
///
/// let platform = Platform::new("linux", "x86_64", None);
/// assert_eq!(
///     resolve_name("demo", "1.0.0", &platform),
///     "demo_1.0.0_linux_x86_64_nogpu.tar"
/// );
/// ```
#[must_use]
pub fn resolve_name(project: &str, version: &str, platform: &Platform) -> String {
    format!(
        "{project}_{version}_{}_{}_{}.{BUNDLE_EXTENSION}",
        platform.os,
        platform.arch,
        platform.gpu_tag()
    )
}

fn check_tag(field: &str, value: &str, allow_underscore: bool) -> BundleResult<()> {
    if value.is_empty() {
        return Err(BundleError::validation(field, "must not be empty"));
    }
    if value.eq_ignore_ascii_case(AUTO) {
        return Err(BundleError::validation(field, "'auto' was not resolved"));
    }
    let valid = value.chars().all(|c| {
        c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || c == '.'
            || c == '-'
            || (allow_underscore && c == '_')
    });
    if !valid {
        let allowed = if allow_underscore {
            "lowercase letters, digits, '.', '-' and '_'"
        } else {
            "lowercase letters, digits, '.' and '-'"
        };
        return Err(BundleError::validation(
            field,
            format!("'{value}' may only contain {allowed}"),
        ));
    }
    Ok(())
}

fn serialize_gpu<S>(gpu: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(gpu.as_deref().unwrap_or("none"))
}

fn deserialize_gpu<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|tag| !NO_GPU_VALUES.contains(&tag.to_ascii_lowercase().as_str())))
}
