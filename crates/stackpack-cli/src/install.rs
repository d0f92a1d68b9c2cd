//! Install command.

use anyhow::{Context, Result};
use stackpack_bundle::{
    ActionOutcome, ArtifactStatus, BundleInstaller, CancelToken, DeployConfig, HandlerRegistry,
    HostFacts, InstallOutcome, InstallReport, Manifest,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// What to install from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A sealed bundle file.
    Bundle(PathBuf),
    /// A manifest whose sources are installed directly (dev mode).
    Manifest(PathBuf),
}

/// Run the install command. Returns whether the run succeeded.
pub fn run(
    source: &Source,
    workspace: &Path,
    json: bool,
    config: &DeployConfig,
    cancel: CancelToken,
) -> Result<bool> {
    let registry = HandlerRegistry::standard(config);
    let installer = BundleInstaller::new(&registry).cancel(cancel);

    let report = match source {
        Source::Bundle(bundle) => {
            if !json {
                println!("Installing {} into {}", bundle.display(), workspace.display());
            }
            installer
                .install(bundle, workspace)
                .with_context(|| format!("Failed to install {}", bundle.display()))?
        }
        Source::Manifest(path) => {
            let manifest = Manifest::load_with(path, &registry, &HostFacts::detect())
                .with_context(|| format!("Failed to load manifest {}", path.display()))?;
            if !json {
                println!(
                    "Installing {} v{} from {} into {}",
                    manifest.project,
                    manifest.version,
                    path.display(),
                    workspace.display()
                );
            }
            installer
                .install_manifest(&manifest, workspace)
                .context("Failed to install from manifest")?
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", render_report(&report));
        println!("Report: {}", InstallReport::path(workspace).display());
    }

    Ok(report.success)
}

/// Human readable summary of an install report.
pub fn render_report(report: &InstallReport) -> String {
    let mut out = String::new();

    for artifact in &report.artifacts {
        let (mark, label) = match artifact.status {
            ArtifactStatus::Installed => ("✓", "installed"),
            ArtifactStatus::AlreadyPresent => ("✓", "already present"),
            ArtifactStatus::Failed => ("✗", "failed"),
            ArtifactStatus::NotAttempted => ("-", "not attempted"),
        };
        let _ = write!(
            out,
            "{mark} {:<13} {} ({label})",
            artifact.kind.as_str(),
            artifact.dest
        );
        if let Some(error) = &artifact.error {
            let _ = write!(out, ": {error}");
        }
        out.push('\n');
    }

    for action in &report.post_install {
        let line = match &action.outcome {
            ActionOutcome::Succeeded => format!("✓ {}", action.name),
            ActionOutcome::Failed { code, stderr_tail } => {
                let mark = if action.critical { "✗" } else { "!" };
                let code = code.map_or_else(|| "no exit code".to_string(), |c| format!("exit {c}"));
                let tail = stderr_tail.lines().last().unwrap_or_default();
                if tail.is_empty() {
                    format!("{mark} {} ({code})", action.name)
                } else {
                    format!("{mark} {} ({code}): {tail}", action.name)
                }
            }
            ActionOutcome::Skipped { reason } => format!("- {} (skipped: {reason})", action.name),
        };
        let _ = writeln!(out, "{line}");
    }

    let critical_failed = report
        .post_install
        .iter()
        .any(|action| action.critical && action.failed());
    let artifacts_ok = report.artifacts.iter().all(|a| a.status.is_ok());
    let summary = match report.outcome {
        InstallOutcome::Completed if report.success => {
            let warnings = report.warnings().count();
            if warnings == 0 {
                format!("Installed {} v{}", report.project, report.version)
            } else {
                format!(
                    "Installed {} v{} with {warnings} warning(s)",
                    report.project, report.version
                )
            }
        }
        InstallOutcome::Cancelled => {
            format!("Install of {} v{} was cancelled", report.project, report.version)
        }
        InstallOutcome::InProgress => {
            format!("Install of {} v{} did not finish", report.project, report.version)
        }
        _ if artifacts_ok && critical_failed => {
            format!("Installed {} v{}, but a critical action failed", report.project, report.version)
        }
        _ => format!("Install of {} v{} failed", report.project, report.version),
    };
    let _ = writeln!(out, "{summary}");
    out
}
