//! CLI subcommand implementations.

use anyhow::{Context as _, Result};
use colored::Colorize;
use playbook::{CancelToken, ExecutionReport, SignedPlaybook, TaskStatus, Verifier};
use std::path::Path;

use crate::cli::JobArgs;
use crate::config::AgentConfig;
use crate::keystore;
use crate::runner::{JobEvents, JobRunner};

/// Load a signed playbook job as dispatched by the control plane.
fn load_job(path: &Path) -> Result<SignedPlaybook> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read job file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid job file: {}", path.display()))
}

fn load_key(args: &JobArgs) -> Result<Vec<u8>> {
    let path = match &args.key_file {
        Some(path) => path.clone(),
        None => keystore::default_key_path()?,
    };
    keystore::load_public_key(&path)
}

fn build_runner(args: &JobArgs) -> Result<JobRunner> {
    let config = AgentConfig::load()?;
    JobRunner::new(
        load_key(args)?,
        config.device_id,
        Some(Box::new(progress_line)),
        JobEvents::default(),
    )
}

fn progress_line(task_name: &str, status: TaskStatus) {
    match status {
        TaskStatus::Running => println!("  {} {}", "→".cyan(), task_name),
        TaskStatus::Completed => println!("  {} {}", "✓".green(), task_name),
        TaskStatus::Skipped => println!("  {} {} (skipped)", "⊘".yellow(), task_name),
        TaskStatus::Failed => println!("  {} {}", "✗".red(), task_name),
        TaskStatus::Pending => {}
    }
}

/// Execute a job against this host.
pub fn apply(args: &JobArgs) -> Result<()> {
    let job = load_job(&args.job)?;
    let runner = build_runner(args)?;
    let report = runner.run(&CancelToken::new(), &job)?;
    emit_report(&report, args.json)
}

/// Simulate a job without touching the host.
pub fn dry_run(args: &JobArgs) -> Result<()> {
    let job = load_job(&args.job)?;
    let runner = build_runner(args)?;
    let report = runner.dry_run(&job)?;
    emit_report(&report, args.json)
}

/// Run only the admission gate and report each check.
pub fn verify(args: &JobArgs) -> Result<()> {
    let job = load_job(&args.job)?;
    let verifier = Verifier::new(&load_key(args)?)?;
    let (record, outcome) = verifier.verify(&job);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let check = |label: &str, ok: bool| {
            let mark = if ok { "✓".green() } else { "✗".red() };
            println!("  {mark} {label}");
        };
        check("hash", record.hash_verified);
        check("signature", record.signature_verified);
        check("approval", record.approval_verified);
        if !record.failure_reason.is_empty() {
            println!("  {} {}", "reason:".red(), record.failure_reason);
        }
    }

    match outcome {
        Ok(()) => {
            println!("{}", "verification passed".green().bold());
            Ok(())
        }
        Err(err) => anyhow::bail!("verification failed: {err}"),
    }
}

/// Print the SHA-256 of a playbook file.
pub fn hash(playbook_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(playbook_path)
        .with_context(|| format!("could not read {}", playbook_path.display()))?;
    println!("{}", playbook::verify::calculate_hash(&content));
    Ok(())
}

fn emit_report(report: &ExecutionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!();
        let headline = format!(
            "{} ({} total, {} completed, {} failed, {} skipped, {})",
            report.status,
            report.tasks_total,
            report.tasks_completed,
            report.tasks_failed,
            report.tasks_skipped,
            report.total_duration
        );
        if report.succeeded() {
            println!("{}", headline.green().bold());
        } else {
            println!("{}", headline.red().bold());
            if !report.error_message.is_empty() {
                println!("{}", report.error_message.red());
            }
        }
        if report.reboot_required {
            println!("{}", "reboot required".yellow().bold());
        }
    }

    if report.succeeded() {
        Ok(())
    } else {
        anyhow::bail!("playbook {}", report.status)
    }
}
