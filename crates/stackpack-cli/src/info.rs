//! Informational commands: bundle naming and known images.

use anyhow::{Context, Result, bail};
use stackpack_bundle::{
    DeployConfig, HandlerRegistry, HostFacts, KNOWN_IMAGES, Manifest, Platform, resolve_name,
};
use std::fmt::Write as _;
use std::path::Path;

/// Tags given on the command line to `stackpack name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameArgs {
    pub project: Option<String>,
    pub version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub gpu: Option<String>,
}

/// Print the bundle name for a manifest, with command line overrides.
///
/// The manifest is optional; when it does not exist every tag must come
/// from the flags.
pub fn name(manifest_path: &Path, args: &NameArgs, config: &DeployConfig) -> Result<()> {
    let host = HostFacts::detect();
    let base = if manifest_path.is_file() {
        let registry = HandlerRegistry::standard(config);
        Some(
            Manifest::load_with(manifest_path, &registry, &host)
                .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?,
        )
    } else {
        tracing::debug!(path = %manifest_path.display(), "no manifest, using flags only");
        None
    };

    println!("{}", resolve(args, base.as_ref(), &host)?);
    Ok(())
}

/// Combine flags with an optional manifest into a bundle name.
pub fn resolve(args: &NameArgs, base: Option<&Manifest>, host: &HostFacts) -> Result<String> {
    let project = pick(args.project.as_deref(), base.map(|m| m.project.as_str()), "project")?;
    let version = pick(args.version.as_deref(), base.map(|m| m.version.as_str()), "version")?;
    let os = pick(args.os.as_deref(), base.map(|m| m.platform.os.as_str()), "os")?;
    let arch = pick(args.arch.as_deref(), base.map(|m| m.platform.arch.as_str()), "arch")?;
    let gpu = match (&args.gpu, base) {
        (Some(flag), _) => normalize_gpu(flag),
        (None, Some(manifest)) => manifest.platform.gpu.clone(),
        (None, None) => None,
    };

    let platform = Platform::new(os, arch, gpu.as_deref()).resolve(host);
    platform.validate("platform")?;
    if project.is_empty() {
        bail!("project must not be empty");
    }

    Ok(resolve_name(project, version, &platform))
}

fn pick<'a>(flag: Option<&'a str>, manifest: Option<&'a str>, field: &str) -> Result<&'a str> {
    match flag.or(manifest) {
        Some(value) => Ok(value),
        None => bail!("--{field} is required when no manifest is available"),
    }
}

fn normalize_gpu(flag: &str) -> Option<String> {
    match flag.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "cpu" => None,
        other => Some(other.to_string()),
    }
}

/// Print the known image table.
pub fn images() {
    print!("{}", render_images());
}

fn render_images() -> String {
    let mut out = String::new();
    for image in KNOWN_IMAGES {
        let gpu = if image.gpu { "gpu" } else { "cpu" };
        let _ = writeln!(
            out,
            "{:<52} {:<8} {:<4} {}",
            image.reference, image.arch, gpu, image.description
        );
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn host() -> HostFacts {
        HostFacts {
            os: "linux".to_string(),
            arch: "aarch64".to_string(),
            gpu: Some("nvidia".to_string()),
        }
    }

    fn manifest() -> Manifest {
        let yaml = r#"
project: apollo-stack
version: 9.0.0
platform: { os: linux, arch: x86_64, gpu: none }
"#;
        let registry = HandlerRegistry::standard(&DeployConfig::default());
        Manifest::from_yaml(yaml, Path::new("."), &registry, &host()).unwrap()
    }

    #[test]
    fn resolve___manifest_only___uses_its_tags() {
        let name = resolve(&NameArgs::default(), Some(&manifest()), &host()).unwrap();

        assert_eq!(name, "apollo-stack_9.0.0_linux_x86_64_nogpu.tar");
    }

    #[test]
    fn resolve___flags_override_manifest() {
        let args = NameArgs {
            version: Some("9.1.0".to_string()),
            gpu: Some("NVIDIA".to_string()),
            ..NameArgs::default()
        };

        let name = resolve(&args, Some(&manifest()), &host()).unwrap();

        assert_eq!(name, "apollo-stack_9.1.0_linux_x86_64_nvidia.tar");
    }

    #[test]
    fn resolve___auto_tags___take_host_values() {
        let args = NameArgs {
            project: Some("demo".to_string()),
            version: Some("1.0.0".to_string()),
            os: Some("auto".to_string()),
            arch: Some("auto".to_string()),
            gpu: Some("auto".to_string()),
        };

        let name = resolve(&args, None, &host()).unwrap();

        assert_eq!(name, "demo_1.0.0_linux_aarch64_nvidia.tar");
    }

    #[test]
    fn resolve___gpu_none_flag___clears_manifest_gpu() {
        let args = NameArgs {
            project: Some("demo".to_string()),
            version: Some("1.0.0".to_string()),
            os: Some("linux".to_string()),
            arch: Some("x86_64".to_string()),
            gpu: Some("cpu".to_string()),
        };

        let name = resolve(&args, None, &host()).unwrap();

        assert_eq!(name, "demo_1.0.0_linux_x86_64_nogpu.tar");
    }

    #[test]
    fn resolve___missing_tag_without_manifest___fails() {
        let args = NameArgs {
            project: Some("demo".to_string()),
            version: Some("1.0.0".to_string()),
            ..NameArgs::default()
        };

        let err = resolve(&args, None, &host()).unwrap_err();

        assert!(err.to_string().contains("--os"));
    }

    #[test]
    fn resolve___unsafe_tag___is_rejected() {
        let args = NameArgs {
            os: Some("linux/evil".to_string()),
            ..NameArgs::default()
        };

        assert!(resolve(&args, Some(&manifest()), &host()).is_err());
    }

    #[test]
    fn render_images___lists_every_known_image() {
        let text = render_images();

        assert_eq!(text.lines().count(), KNOWN_IMAGES.len());
        assert!(text.contains("apolloauto/apollo:dev-x86_64-18.04-20221124_1708"));
    }
}
