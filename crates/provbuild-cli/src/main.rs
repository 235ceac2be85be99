//! provbuild CLI
//!
//! Builds artifacts from a git commit inside a digest-pinned builder image
//! and records what was built as SLSA v1 provenance.
//!
//! ## Commands
//!
//! - `dry-run`: check out the source, load the build file and write the
//!   build definition without building
//! - `build`: run the build and write the subjects (and provenance)
//! - `verify`: repeat the build recorded in a provenance file and compare

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use provbuild_core::{
    rebuild_and_verify, safe_read_file, Builder, ContainerBuildConfig, InputOptions,
    ProvenanceStatement, VerifyOptions,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

const DEFAULT_OUTPUT_FOLDER: &str = "provbuild-out";

#[derive(Parser)]
#[command(name = "provbuild")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Container builds with verifiable SLSA provenance", long_about = None)]
struct Cli {
    /// Echo build output while it runs and log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Inputs describing one container-based build.
#[derive(Args, Debug, Clone)]
struct BuildInputs {
    /// Source repository, e.g. git+https://github.com/org/repo@refs/heads/main
    #[arg(long, env = "PROVBUILD_SOURCE_REPO")]
    source_repo: String,

    /// Commit the source must be at (sha1:<hex> or bare hex)
    #[arg(long, env = "PROVBUILD_GIT_COMMIT_HASH")]
    git_commit_hash: String,

    /// Builder image pinned by digest, e.g. bash@sha256:<hex>
    #[arg(long, env = "PROVBUILD_BUILDER_IMAGE")]
    builder_image: String,

    /// Build file path, relative to the repository root
    #[arg(long, env = "PROVBUILD_BUILD_CONFIG_PATH")]
    build_config_path: String,

    /// Fetch a fresh copy instead of failing on a commit mismatch
    #[arg(long)]
    force_checkout: bool,

    /// Container runtime program
    #[arg(long, env = "PROVBUILD_CONTAINER_RUNTIME")]
    container_runtime: Option<String>,

    /// Directory checked first for an existing checkout
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

impl BuildInputs {
    fn to_config(&self, verbose: bool) -> Result<ContainerBuildConfig> {
        let io = InputOptions {
            source_repo: self.source_repo.clone(),
            git_commit_hash: self.git_commit_hash.clone(),
            builder_image: self.builder_image.clone(),
            build_config_path: self.build_config_path.clone(),
            force_checkout: self.force_checkout,
            verbose,
            container_runtime: self.container_runtime.clone(),
        };
        ContainerBuildConfig::new(&io).context("Invalid build inputs")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check out the source and write the build definition, without building
    DryRun {
        #[command(flatten)]
        inputs: BuildInputs,

        /// Where to write the build definition JSON
        #[arg(long)]
        build_definition_path: PathBuf,
    },

    /// Run the build and write the produced subjects
    Build {
        #[command(flatten)]
        inputs: BuildInputs,

        /// Where to write the subjects JSON
        #[arg(long)]
        subjects_path: PathBuf,

        /// Also write an (unsigned) provenance statement here
        #[arg(long)]
        provenance_path: Option<PathBuf>,

        /// Copy the artifacts into this folder; defaults to
        /// WORK_DIR/provbuild-out when the source had to be cloned
        #[arg(long)]
        output_folder: Option<PathBuf>,
    },

    /// Repeat the build recorded in a provenance file and compare subjects
    Verify {
        /// Provenance statement JSON
        #[arg(long)]
        provenance_path: PathBuf,

        /// Fetch a fresh copy instead of failing on a commit mismatch
        #[arg(long)]
        force_checkout: bool,

        /// Container runtime program
        #[arg(long, env = "PROVBUILD_CONTAINER_RUNTIME")]
        container_runtime: Option<String>,

        /// Directory checked first for an existing checkout
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Copy the rebuilt artifacts into this folder
        #[arg(long)]
        output_folder: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    provbuild_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::DryRun {
            inputs,
            build_definition_path,
        } => cmd_dry_run(&inputs, cli.verbose, &build_definition_path).await,
        Commands::Build {
            inputs,
            subjects_path,
            provenance_path,
            output_folder,
        } => {
            cmd_build(
                &inputs,
                cli.verbose,
                &subjects_path,
                provenance_path.as_deref(),
                output_folder.as_deref(),
            )
            .await
        }
        Commands::Verify {
            provenance_path,
            force_checkout,
            container_runtime,
            work_dir,
            output_folder,
        } => {
            let options = VerifyOptions {
                work_dir,
                force_checkout,
                verbose: cli.verbose,
                container_runtime,
                output_folder,
            };
            cmd_verify(&provenance_path, &options).await
        }
    }
}

/// Folder the built artifacts are exported to.
///
/// A fresh clone is removed once the build is done, so its artifacts are
/// always exported; an in-place checkout keeps them where they were built.
fn artifact_destination(
    owned_checkout: bool,
    output_folder: Option<&Path>,
    work_dir: &Path,
) -> Option<PathBuf> {
    match output_folder {
        Some(folder) => Some(folder.to_path_buf()),
        None if owned_checkout => Some(work_dir.join(DEFAULT_OUTPUT_FOLDER)),
        None => None,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

async fn cmd_dry_run(inputs: &BuildInputs, verbose: bool, out: &Path) -> Result<()> {
    let config = inputs.to_config(verbose)?;
    let builder = Builder::with_git_fetcher(config, &inputs.work_dir)?;
    let build = builder
        .set_up_build_state()
        .await
        .context("Failed to set up the build")?;

    write_json(out, &build.create_build_definition())?;
    info!(path = %out.display(), "build definition written");
    println!("Build definition written to {}", out.display());
    Ok(())
}

async fn cmd_build(
    inputs: &BuildInputs,
    verbose: bool,
    subjects_path: &Path,
    provenance_path: Option<&Path>,
    output_folder: Option<&Path>,
) -> Result<()> {
    let config = inputs.to_config(verbose)?;
    let builder = Builder::with_git_fetcher(config, &inputs.work_dir)?;
    let build = builder
        .set_up_build_state()
        .await
        .context("Failed to set up the build")?;

    let destination =
        artifact_destination(build.checkout_info().is_owned(), output_folder, &inputs.work_dir);
    let statement = build
        .build_with_provenance(destination.as_deref())
        .await
        .context("Build failed")?;

    write_json(subjects_path, &statement.subject)?;
    if let Some(path) = provenance_path {
        write_json(path, &statement)?;
    }

    println!("Built {} artifact(s):", statement.subject.len());
    for subject in &statement.subject {
        println!("  {}  sha256:{}", subject.name, subject.sha256().unwrap_or_default());
    }
    if let Some(folder) = &destination {
        println!("Artifacts copied to {}", folder.display());
    }
    Ok(())
}

async fn cmd_verify(provenance_path: &Path, options: &VerifyOptions) -> Result<()> {
    let bytes = safe_read_file(provenance_path)
        .with_context(|| format!("Failed to read {}", provenance_path.display()))?;
    let statement = ProvenanceStatement::parse(&bytes).context("Invalid provenance")?;

    let subjects = rebuild_and_verify(&statement, options)
        .await
        .context("Verification failed")?;

    println!("Verified {} artifact(s) against {}", subjects.len(), provenance_path.display());
    Ok(())
}
