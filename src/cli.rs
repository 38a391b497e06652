//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "drover",
    about = "Cross-platform endpoint management agent",
    version
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Verify and execute a signed playbook job
    Apply(JobArgs),

    /// Verify and simulate a signed playbook job without touching the host
    DryRun(JobArgs),

    /// Run only the verification chain on a signed playbook job
    Verify(JobArgs),

    /// Print the SHA-256 hash of a playbook file, as the control plane
    /// computes it when signing
    Hash {
        /// Path to the playbook YAML
        playbook: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate for
        shell: Shell,
    },
}

#[derive(clap::Args)]
pub struct JobArgs {
    /// Path to a signed playbook job (JSON, as dispatched by the control
    /// plane)
    pub job: PathBuf,

    /// Override the pinned signing key file
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Emit the full execution report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
