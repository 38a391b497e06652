//! Job runner: serialized playbook execution with event callbacks.
//!
//! The control plane may hand the agent several jobs at once; this runner
//! guarantees at most one playbook executes at a time per agent. Transport
//! is someone else's problem — the runner consumes already-fetched
//! [`SignedPlaybook`] values.

use anyhow::{Context as _, Result};
use playbook::{
    CancelToken, ExecutionReport, Executor, ExecutorConfig, SignedPlaybook, TaskStatus,
};
use std::sync::Mutex;

/// Callbacks for job lifecycle events. All optional.
#[derive(Default)]
pub struct JobEvents {
    pub on_job_start: Option<Box<dyn Fn(&SignedPlaybook) + Send + Sync>>,
    pub on_job_complete: Option<Box<dyn Fn(&SignedPlaybook, &ExecutionReport) + Send + Sync>>,
    pub on_job_error: Option<Box<dyn Fn(&SignedPlaybook, &anyhow::Error) + Send + Sync>>,
}

pub struct JobRunner {
    executor: Executor,
    events: JobEvents,
    // Mutual exclusion for playbook execution. try_lock failure means a
    // job is already running on this agent.
    running: Mutex<()>,
}

impl JobRunner {
    /// Build a runner around a fully-equipped executor: the pinned signing
    /// key, this device's ID, and every built-in action handler.
    pub fn new(
        server_public_key: Vec<u8>,
        device_id: String,
        on_progress: Option<Box<dyn Fn(&str, TaskStatus) + Send + Sync>>,
        events: JobEvents,
    ) -> Result<Self> {
        let mut executor = Executor::new(ExecutorConfig {
            server_public_key,
            device_id,
            platform: None,
            on_progress,
        })
        .context("failed to create executor")?;
        playbook::actions::register_all(&mut executor);

        Ok(JobRunner {
            executor,
            events,
            running: Mutex::new(()),
        })
    }

    /// Execute one job. Returns an error without touching the playbook if
    /// another job currently holds the agent.
    pub fn run(&self, token: &CancelToken, job: &SignedPlaybook) -> Result<ExecutionReport> {
        let Ok(_guard) = self.running.try_lock() else {
            return Err(self.job_error(job, "another playbook is already executing on this agent"));
        };

        if let Some(on_start) = &self.events.on_job_start {
            on_start(job);
        }
        log::info!("executing playbook {} ({})", job.playbook_id, job.status);

        let report = self.executor.execute(token, job);
        log::info!(
            "playbook {} finished: {} ({} completed, {} failed, {} skipped)",
            job.playbook_id,
            report.status,
            report.tasks_completed,
            report.tasks_failed,
            report.tasks_skipped
        );

        if !report.succeeded() {
            let err = anyhow::anyhow!(
                "playbook {} {}: {}",
                job.playbook_id,
                report.status,
                report.error_message
            );
            if let Some(on_error) = &self.events.on_job_error {
                on_error(job, &err);
            }
        }

        // The report is submittable either way; on_job_complete always sees it.
        if let Some(on_complete) = &self.events.on_job_complete {
            on_complete(job, &report);
        }
        Ok(report)
    }

    /// Simulate one job under the same mutual exclusion as [`JobRunner::run`].
    pub fn dry_run(&self, job: &SignedPlaybook) -> Result<ExecutionReport> {
        let Ok(_guard) = self.running.try_lock() else {
            return Err(self.job_error(job, "another playbook is already executing on this agent"));
        };
        log::info!("dry-running playbook {}", job.playbook_id);
        Ok(self.executor.dry_run(job))
    }

    /// Build a job-level error and fire the error callback.
    fn job_error(&self, job: &SignedPlaybook, message: &str) -> anyhow::Error {
        let err = anyhow::anyhow!("{message}");
        if let Some(on_error) = &self.events.on_job_error {
            on_error(job, &err);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer as _, SigningKey};
    use playbook::types::PlaybookStatus;
    use sha2::{Digest, Sha256};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn signed_job(content: &str, signing: &SigningKey) -> SignedPlaybook {
        let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
        SignedPlaybook {
            content: content.into(),
            sha256_hash: hex::encode(digest),
            signature: signing.sign(&digest).to_bytes().to_vec(),
            status: PlaybookStatus::Approved,
            playbook_id: "job-1".into(),
            ..Default::default()
        }
    }

    fn runner_with_events(events: JobEvents) -> (JobRunner, SigningKey) {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let runner = JobRunner::new(
            signing.verifying_key().as_bytes().to_vec(),
            "device-test".into(),
            None,
            events,
        )
        .unwrap();
        (runner, signing)
    }

    #[test]
    fn runs_a_job_and_fires_callbacks() {
        let started = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let (started_c, completed_c) = (started.clone(), completed.clone());

        let (runner, signing) = runner_with_events(JobEvents {
            on_job_start: Some(Box::new(move |_| {
                started_c.fetch_add(1, Ordering::SeqCst);
            })),
            on_job_complete: Some(Box::new(move |_, report| {
                assert!(report.succeeded());
                completed_c.fetch_add(1, Ordering::SeqCst);
            })),
            on_job_error: None,
        });

        let job = signed_job(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: \"true\" }\n",
            &signing,
        );
        let report = runner.run(&CancelToken::new(), &job).unwrap();
        assert!(report.succeeded());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_jobs_still_produce_reports_and_fire_on_job_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_c = errors.clone();

        let (runner, signing) = runner_with_events(JobEvents {
            on_job_error: Some(Box::new(move |job, err| {
                assert_eq!(job.playbook_id, "job-1");
                assert!(err.to_string().contains("rejected"));
                errors_c.fetch_add(1, Ordering::SeqCst);
            })),
            ..JobEvents::default()
        });
        let mut job = signed_job(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: \"true\" }\n",
            &signing,
        );
        job.signature.reverse();

        let report = runner.run(&CancelToken::new(), &job).unwrap();
        assert!(!report.succeeded());
        assert!(!report.verification.signature_verified);
        assert!(report.task_results.is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn successful_jobs_do_not_fire_on_job_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_c = errors.clone();

        let (runner, signing) = runner_with_events(JobEvents {
            on_job_error: Some(Box::new(move |_, _| {
                errors_c.fetch_add(1, Ordering::SeqCst);
            })),
            ..JobEvents::default()
        });
        let job = signed_job(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: \"true\" }\n",
            &signing,
        );

        let report = runner.run(&CancelToken::new(), &job).unwrap();
        assert!(report.succeeded());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dry_run_does_not_mutate() {
        let (runner, signing) = runner_with_events(JobEvents::default());
        let job = signed_job(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: \"true\" }\n",
            &signing,
        );
        let report = runner.dry_run(&job).unwrap();
        assert_eq!(report.status.to_string(), "dry_run_ok");
    }
}
