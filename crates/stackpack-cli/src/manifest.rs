//! Manifest check command

use anyhow::{Context, Result};
use stackpack_bundle::{DeployConfig, HandlerRegistry, HostFacts, Manifest};
use std::fmt::Write as _;
use std::path::Path;

/// Check command implementation
pub fn check(manifest_path: &Path, config: &DeployConfig) -> Result<()> {
    println!("Checking manifest: {}", manifest_path.display());

    let registry = HandlerRegistry::standard(config);
    let manifest = Manifest::load_with(manifest_path, &registry, &HostFacts::detect())
        .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?;

    print!("{}", summary(&manifest));
    println!("\nManifest is valid!");

    Ok(())
}

/// Checkmark summary of a valid manifest.
pub fn summary(manifest: &Manifest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "✓ Project: {} v{}", manifest.project, manifest.version);
    let _ = writeln!(out, "✓ Platform: {}", manifest.platform);
    let _ = writeln!(out, "✓ Artifacts: {}", manifest.artifacts.len());
    for entry in &manifest.artifacts {
        let _ = writeln!(
            out,
            "    {:<13} {} -> {} ({})",
            entry.kind.as_str(),
            entry.source,
            entry.dest,
            entry.source.describe()
        );
    }
    let critical = manifest.post_install.iter().filter(|a| a.critical).count();
    let _ = writeln!(
        out,
        "✓ Post-install actions: {} ({critical} critical)",
        manifest.post_install.len()
    );
    let _ = writeln!(out, "✓ Bundle name: {}", manifest.bundle_name());
    out
}
