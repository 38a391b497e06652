mod cli;
mod commands;
mod config;
mod keystore;
mod paths;
mod runner;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match cli.command {
        Command::Apply(args) => commands::apply(&args),
        Command::DryRun(args) => commands::dry_run(&args),
        Command::Verify(args) => commands::verify(&args),
        Command::Hash { playbook } => commands::hash(&playbook),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "drover", &mut io::stdout());
            Ok(())
        }
    }
}
