//! stackpack CLI - pack and install release bundles
//!
//! Commands:
//! - `stackpack pack` - Pack the artifacts of a manifest into a bundle
//! - `stackpack run` - Install a bundle (or a manifest, in dev mode) into a workspace
//! - `stackpack check` - Validate a manifest
//! - `stackpack list` - Show the contents of a bundle
//! - `stackpack name` - Predict a bundle file name
//! - `stackpack images` - Show the known container images

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use stackpack_bundle::{CancelToken, DeployConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod bundle;
mod info;
mod install;
mod interrupt;
mod logging;
mod manifest;

#[derive(Parser)]
#[command(name = "stackpack")]
#[command(author, version, about = "Pack and install multi-artifact release bundles", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Path to the manifest (default: manifest.yaml, or the config file's default_manifest)
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a config file (default: ~/.config/stackpack/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack the artifacts declared in a manifest into a bundle
    #[command(visible_alias = "p")]
    Pack {
        /// Output directory for the bundle (default: config output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Install a bundle into a workspace
    #[command(visible_aliases = ["install", "i"])]
    Run {
        /// Bundle to install; without it the manifest is installed directly
        #[arg(short, long)]
        bundle: Option<PathBuf>,

        /// Target workspace (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Print the install report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a manifest without touching anything
    Check,

    /// Show the embedded manifest and file list of a bundle
    List {
        /// Bundle file
        bundle: PathBuf,
    },

    /// Print the bundle name a manifest (or explicit tags) would produce
    Name {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        os: Option<String>,

        #[arg(long)]
        arch: Option<String>,

        /// GPU vendor, or "none"
        #[arg(long)]
        gpu: Option<String>,
    },

    /// List the container images this stack is known to ship with
    Images,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = DeployConfig::load(cli.global.config.as_deref()).context("Failed to load config")?;
    logging::init(cli.global.verbose, cli.global.quiet, &config.log_level);

    let manifest_path = cli
        .global
        .manifest
        .clone()
        .unwrap_or_else(|| config.default_manifest.clone());

    let cancel = CancelToken::new();
    interrupt::install(cancel.clone());

    match cli.command {
        Commands::Pack { output } => {
            let output_dir = output.unwrap_or_else(|| config.output_dir.clone());
            bundle::pack(&manifest_path, &output_dir, &config, cancel)?;
        }
        Commands::Run {
            bundle,
            workspace,
            json,
        } => {
            let source = match bundle {
                Some(path) => install::Source::Bundle(path),
                None => install::Source::Manifest(manifest_path),
            };
            let success = install::run(&source, &workspace, json, &config, cancel)?;
            if !success {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Check => {
            manifest::check(&manifest_path, &config)?;
        }
        Commands::List { bundle } => {
            bundle::list(&bundle)?;
        }
        Commands::Name {
            project,
            version,
            os,
            arch,
            gpu,
        } => {
            let tags = info::NameArgs {
                project,
                version,
                os,
                arch,
                gpu,
            };
            info::name(&manifest_path, &tags, &config)?;
        }
        Commands::Images => {
            info::images();
        }
    }

    Ok(ExitCode::SUCCESS)
}
