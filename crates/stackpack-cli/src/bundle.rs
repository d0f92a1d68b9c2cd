//! Bundle creation and inspection commands.

use anyhow::{Context, Result};
use stackpack_bundle::archive::{self, ArchiveEntry};
use stackpack_bundle::{
    BundlePacker, CancelToken, DeployConfig, HandlerRegistry, HostFacts, MANIFEST_FILE, Manifest,
};
use std::fmt::Write as _;
use std::path::Path;

/// Run the pack command.
pub fn pack(manifest_path: &Path, output_dir: &Path, config: &DeployConfig, cancel: CancelToken) -> Result<()> {
    let registry = HandlerRegistry::standard(config);
    let manifest = Manifest::load_with(manifest_path, &registry, &HostFacts::detect())
        .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;

    println!(
        "Packing {} v{} for {}",
        manifest.project, manifest.version, manifest.platform
    );

    let output = BundlePacker::new(&registry)
        .output_dir(output_dir)
        .cancel(cancel)
        .pack(&manifest)
        .context("Failed to pack bundle")?;

    for artifact in &output.artifacts {
        println!(
            "  {:<13} {} -> {} ({})",
            artifact.kind.as_str(),
            artifact.payload,
            artifact.dest,
            human_size(artifact.size)
        );
    }
    println!("✓ Bundle: {}", output.path.display());

    Ok(())
}

/// Run the list command.
pub fn list(bundle: &Path) -> Result<()> {
    let yaml = archive::read_file(bundle, MANIFEST_FILE)
        .with_context(|| format!("Failed to read bundle {}", bundle.display()))?
        .with_context(|| format!("{} has no {MANIFEST_FILE}", bundle.display()))?;
    let yaml = String::from_utf8(yaml).context("Embedded manifest is not UTF-8")?;

    let registry = HandlerRegistry::standard(&DeployConfig::default());
    let manifest = Manifest::from_yaml(&yaml, Path::new("."), &registry, &HostFacts::detect())
        .context("Embedded manifest is invalid")?;
    let entries = archive::list(bundle)
        .with_context(|| format!("Failed to list bundle {}", bundle.display()))?;

    print!("{}", render_listing(&manifest, &entries));
    Ok(())
}

/// Text shown by `stackpack list`.
pub fn render_listing(manifest: &Manifest, entries: &[ArchiveEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Project:  {} v{}", manifest.project, manifest.version);
    let _ = writeln!(out, "Platform: {}", manifest.platform);
    let _ = writeln!(out, "Artifacts:");
    for entry in &manifest.artifacts {
        let _ = writeln!(out, "  {:<13} {} -> {}", entry.kind.as_str(), entry.source, entry.dest);
    }
    if !manifest.post_install.is_empty() {
        let _ = writeln!(out, "Post-install:");
        for action in &manifest.post_install {
            let flag = if action.critical { "" } else { " (optional)" };
            let _ = writeln!(out, "  {}{flag}", action.name);
        }
    }
    let _ = writeln!(out, "Files:");
    for entry in entries.iter().filter(|e| !e.is_dir) {
        let _ = writeln!(out, "  {:>10}  {}", human_size(entry.size), entry.path);
    }
    out
}

/// Format a byte count with a binary unit.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
