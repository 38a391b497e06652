//! Playbook execution.
//!
//! The executor is the only entry point for running a signed playbook, and
//! it enforces the admission gate before anything else: verification,
//! parsing, platform compatibility, then the task loop with retries,
//! handler notification, rollback and reporting. A playbook that fails
//! verification never reaches a single action handler — that holds for dry
//! runs too.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::actions::{ActionHandler, CommandFailed};
use crate::cancel::CancelToken;
use crate::conditions::{Condition, validate_condition};
use crate::error::{ParseError, SecurityError};
use crate::parser::Parser;
use crate::report::{count_result, finish_report, finish_task, format_duration};
use crate::types::{
    self, ExecutionReport, Playbook, ReportStatus, SignedPlaybook, Task, TaskResult, TaskStatus,
};
use crate::vars::Variables;
use crate::verify::Verifier;

/// Progress callback: `(task_name, status)` transitions, invoked from the
/// executor thread only. Each task sees one `running` and one terminal
/// status.
pub type ProgressFn = Box<dyn Fn(&str, TaskStatus) + Send + Sync>;

/// Configuration for building an [`Executor`].
pub struct ExecutorConfig {
    /// Raw Ed25519 public key pinned at enrollment. Required.
    pub server_public_key: Vec<u8>,
    /// Device identifier stamped into execution reports.
    pub device_id: String,
    /// Targeting platform override; defaults to the running host.
    pub platform: Option<String>,
    /// Optional progress callback.
    pub on_progress: Option<ProgressFn>,
}

/// Drives verified playbooks against the host.
pub struct Executor {
    verifier: Verifier,
    parser: Parser,
    handlers: HashMap<String, Box<dyn ActionHandler>>,
    platform: String,
    device_id: String,
    on_progress: Option<ProgressFn>,
}

impl Executor {
    /// Build an executor. Fails if the public key is not a valid Ed25519
    /// key of exactly 32 bytes.
    pub fn new(config: ExecutorConfig) -> Result<Self, SecurityError> {
        let verifier = Verifier::new(&config.server_public_key)?;
        let platform = config
            .platform
            .unwrap_or_else(|| types::current_platform().to_string());
        Ok(Executor {
            verifier,
            parser: Parser::with_platform(&platform),
            handlers: HashMap::new(),
            platform,
            device_id: config.device_id,
            on_progress: config.on_progress,
        })
    }

    /// Register an action handler under its tag, replacing any previous one.
    pub fn register_handler(&mut self, action: &str, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(action.to_string(), handler);
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Run a signed playbook end to end.
    ///
    /// Always returns a submittable report carrying the verification
    /// record, whatever happened.
    pub fn execute(&self, token: &CancelToken, sp: &SignedPlaybook) -> ExecutionReport {
        let mut report = self.new_report(sp);

        // Admission gate. A failure here is terminal and the content is
        // never parsed.
        let playbook = match self.admit(sp, &mut report) {
            Some(playbook) => playbook,
            None => return report,
        };

        report.status = ReportStatus::Running;
        report.tasks_total = playbook.tasks.len();

        let mut vars = Variables::new();
        vars.set_user_vars(&playbook.variables);

        let mut dirty_handlers: HashSet<String> = HashSet::new();
        let mut completed: Vec<usize> = Vec::new();

        for (i, task) in playbook.tasks.iter().enumerate() {
            if token.is_cancelled() {
                finish_report(&mut report, ReportStatus::Cancelled);
                report.error_message = "execution cancelled".into();
                return report;
            }

            let result = self.execute_task(token, task, &vars);
            let status = result.status;
            let changed = result.changed;
            let error = result.error.clone();

            if !task.register.is_empty() {
                vars.set_task_result(&task.register, &result);
            }
            report.task_results.push(result);
            count_result(&mut report, status);

            match status {
                TaskStatus::Completed => {
                    completed.push(i);
                    if changed {
                        dirty_handlers.extend(task.notify.iter().cloned());
                    }
                }
                TaskStatus::Failed if !task.ignore_errors => {
                    let strategy = playbook
                        .on_error
                        .as_ref()
                        .map(|p| p.strategy.as_str())
                        .unwrap_or("stop");
                    match strategy {
                        "continue" => {}
                        "rollback" => {
                            self.rollback_completed(token, &playbook, &completed, &mut report, &vars);
                            finish_report(&mut report, ReportStatus::Failed);
                            report.error_message = format!("task '{}' failed: {error}", task.name);
                            return report;
                        }
                        _ => {
                            finish_report(&mut report, ReportStatus::Failed);
                            report.error_message = error;
                            return report;
                        }
                    }
                }
                _ => {}
            }
        }

        // Handlers run after all tasks, in their textual order, only when
        // some changed task notified them.
        for handler in &playbook.handlers {
            if !dirty_handlers.contains(&handler.name) {
                continue;
            }
            let result = self.execute_task(token, handler, &vars);
            if result.status == TaskStatus::Failed && !handler.ignore_errors {
                report.tasks_failed += 1;
            }
            report.task_results.push(result);
        }

        report.reboot_required = playbook.requires_reboot;
        finish_report(&mut report, ReportStatus::Completed);
        report
    }

    /// Verify and parse a playbook, simulating each task without touching
    /// the host. The admission rules are exactly those of [`Executor::execute`].
    pub fn dry_run(&self, sp: &SignedPlaybook) -> ExecutionReport {
        let mut report = self.new_report(sp);
        report.status = ReportStatus::DryRun;

        let playbook = match self.admit(sp, &mut report) {
            Some(playbook) => playbook,
            None => return report,
        };
        report.tasks_total = playbook.tasks.len();

        for task in &playbook.tasks {
            let mut sim = TaskResult::started(task);

            if !task.platform.is_empty() && task.platform != self.platform {
                sim.status = TaskStatus::Skipped;
                sim.message = "Would skip: platform filter".into();
            } else if !task.when.is_empty() {
                match validate_condition(&task.when) {
                    Ok(()) => {
                        sim.message = format!("Would execute if condition '{}' is true", task.when);
                    }
                    Err(err) => {
                        sim.status = TaskStatus::Failed;
                        sim.error = format!("Invalid condition: {err}");
                        report.tasks_failed += 1;
                    }
                }
            } else {
                sim.message = "Would execute".into();
            }

            if sim.status != TaskStatus::Failed {
                match self.handlers.get(&task.action) {
                    None => {
                        sim.status = TaskStatus::Failed;
                        sim.error = format!("No handler for action '{}'", task.action);
                        report.tasks_failed += 1;
                    }
                    Some(handler) => {
                        if let Err(err) = handler.validate(&task.params) {
                            sim.status = TaskStatus::Failed;
                            sim.error = format!("Invalid params: {err:#}");
                            report.tasks_failed += 1;
                        }
                    }
                }
            }

            finish_task(&mut sim);
            report.task_results.push(sim);
        }

        if report.tasks_failed > 0 {
            finish_report(&mut report, ReportStatus::DryRunFailed);
            report.error_message = format!("dry run found {} issues", report.tasks_failed);
        } else {
            finish_report(&mut report, ReportStatus::DryRunOk);
        }
        report
    }

    fn new_report(&self, sp: &SignedPlaybook) -> ExecutionReport {
        ExecutionReport {
            playbook_id: sp.playbook_id.clone(),
            device_id: self.device_id.clone(),
            start_time: Utc::now(),
            status: ReportStatus::Pending,
            ..Default::default()
        }
    }

    /// Run the admission gate and the parser, recording failures on the
    /// report. Returns the playbook only if it may execute.
    fn admit(&self, sp: &SignedPlaybook, report: &mut ExecutionReport) -> Option<Playbook> {
        let (record, outcome) = self.verifier.verify(sp);
        report.verification = record;

        if let Err(err) = outcome {
            log::warn!("playbook {} rejected: {err}", sp.playbook_id);
            finish_report(report, ReportStatus::Rejected);
            report.error_message = format!("SECURITY: {err}");
            return None;
        }

        match self.parser.parse(&sp.content) {
            Ok(playbook) => {
                report.playbook_name = playbook.name.clone();
                Some(playbook)
            }
            Err(ParseError::PlatformUnsupported(platform)) => {
                finish_report(report, ReportStatus::Rejected);
                report.error_message =
                    format!("Platform '{platform}' not supported by this playbook");
                None
            }
            Err(err) => {
                finish_report(report, ReportStatus::Failed);
                report.error_message = format!("Parse error: {err}");
                None
            }
        }
    }

    /// Execute one task: platform filter, condition, handler dispatch,
    /// substitution, retries, and per-task rollback.
    fn execute_task(&self, token: &CancelToken, task: &Task, vars: &Variables) -> TaskResult {
        let mut result = TaskResult::started(task);
        self.progress(&task.name, TaskStatus::Running);

        // Platform filter comes before handler lookup: a filtered-out task
        // is skipped, never failed.
        if !task.platform.is_empty() && task.platform != self.platform {
            result.status = TaskStatus::Skipped;
            result.message = format!(
                "Skipped: platform filter '{}' doesn't match '{}'",
                task.platform, self.platform
            );
            return self.finish(result);
        }

        if !task.when.is_empty() {
            match Condition::new(vars).evaluate(&task.when) {
                Ok(true) => {}
                Ok(false) => {
                    result.status = TaskStatus::Skipped;
                    result.message =
                        format!("Skipped: condition '{}' evaluated to false", task.when);
                    return self.finish(result);
                }
                Err(err) => {
                    result.status = TaskStatus::Failed;
                    result.error = format!("condition evaluation failed: {err}");
                    return self.finish(result);
                }
            }
        }

        let Some(handler) = self.handlers.get(&task.action) else {
            result.status = TaskStatus::Failed;
            result.error = format!("no handler registered for action '{}'", task.action);
            return self.finish(result);
        };

        let supported = handler
            .supports()
            .iter()
            .any(|p| *p == "all" || *p == self.platform);
        if !supported {
            result.status = TaskStatus::Failed;
            result.error = format!(
                "action '{}' does not support platform '{}'",
                task.action, self.platform
            );
            return self.finish(result);
        }

        let params = match vars.substitute_map(&task.params) {
            Ok(params) => params,
            Err(err) => {
                result.status = TaskStatus::Failed;
                result.error = format!("variable substitution failed: {err}");
                return self.finish(result);
            }
        };

        let max_attempts = task.retries.max(0) as u64 + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            result.status = TaskStatus::Running;

            match handler.execute(token, &params, vars) {
                Ok(output) => {
                    result.status = TaskStatus::Completed;
                    result.changed = output.changed;
                    result.stdout = output.stdout;
                    result.stderr = output.stderr;
                    result.exit_code = output.exit_code;
                    result.message = output.message;
                    return self.finish(result);
                }
                Err(err) => {
                    if let Some(failed) = err.downcast_ref::<CommandFailed>() {
                        result.stdout = failed.stdout.clone();
                        result.stderr = failed.stderr.clone();
                        result.exit_code = failed.exit_code;
                    }
                    last_error = format!("{err:#}");
                    log::debug!(
                        "task '{}' attempt {attempt}/{max_attempts} failed: {last_error}",
                        task.name
                    );
                }
            }

            if attempt < max_attempts && task.retry_delay > 0 {
                let delay = std::time::Duration::from_secs(task.retry_delay as u64);
                if !token.sleep(delay) {
                    result.status = TaskStatus::Failed;
                    result.error = "cancelled during retry delay".into();
                    return self.finish(result);
                }
            }
        }

        result.status = TaskStatus::Failed;
        result.error = if last_error.is_empty() {
            "task failed after all retries".into()
        } else {
            last_error
        };
        result.end_time = Utc::now();
        result.duration = format_duration(result.start_time, result.end_time);

        // Per-task rollback on terminal failure; its outcome annotates the
        // failing result rather than replacing it.
        if let Some(rollback) = &task.rollback {
            let rollback_result = self.execute_task(token, rollback, vars);
            if rollback_result.status == TaskStatus::Failed {
                result.error = format!(
                    "{} (rollback also failed: {})",
                    result.error, rollback_result.error
                );
            } else {
                result.message = "Rollback executed successfully".into();
            }
        }

        self.progress(&task.name, TaskStatus::Failed);
        result
    }

    /// on_error rollback strategy: unwind every completed task's rollback
    /// block in reverse completion order.
    fn rollback_completed(
        &self,
        token: &CancelToken,
        playbook: &Playbook,
        completed: &[usize],
        report: &mut ExecutionReport,
        vars: &Variables,
    ) {
        for &i in completed.iter().rev() {
            if let Some(rollback) = &playbook.tasks[i].rollback {
                let result = self.execute_task(token, rollback, vars);
                report.task_results.push(result);
            }
        }
    }

    /// Stamp timing and emit the terminal progress event.
    fn finish(&self, mut result: TaskResult) -> TaskResult {
        finish_task(&mut result);
        self.progress(&result.task_name, result.status);
        result
    }

    fn progress(&self, task_name: &str, status: TaskStatus) {
        if let Some(callback) = &self.on_progress {
            callback(task_name, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionOutput, required_str};
    use crate::types::PlaybookStatus;
    use crate::verify::calculate_hash;
    use anyhow::bail;
    use ed25519_dalek::{Signer as _, SigningKey};
    use sha2::{Digest, Sha256};
    use std::sync::{Arc, Mutex};

    const TEST_KEY_SEED: [u8; 32] = [9u8; 32];

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&TEST_KEY_SEED)
    }

    fn sign(content: &str, status: PlaybookStatus) -> SignedPlaybook {
        let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
        SignedPlaybook {
            content: content.into(),
            sha256_hash: calculate_hash(content),
            signature: signing_key().sign(&digest).to_bytes().to_vec(),
            status,
            playbook_id: "pb-exec-test".into(),
            ..Default::default()
        }
    }

    /// Scripted stand-in registered under the `command` tag so playbooks
    /// stay schema-valid without touching the OS.
    #[derive(Clone, Default)]
    struct MockHandler {
        calls: Arc<Mutex<Vec<String>>>,
        flaky_remaining: Arc<Mutex<i64>>,
    }

    impl ActionHandler for MockHandler {
        fn supports(&self) -> &'static [&'static str] {
            &["all"]
        }

        fn validate(&self, _params: &types::Params) -> anyhow::Result<()> {
            Ok(())
        }

        fn execute(
            &self,
            _token: &CancelToken,
            params: &types::Params,
            _vars: &Variables,
        ) -> anyhow::Result<ActionOutput> {
            let command = required_str(params, "command")?.to_string();
            self.calls.lock().unwrap().push(command.clone());

            if let Some(text) = command.strip_prefix("echo ") {
                let mut output = ActionOutput::changed();
                output.stdout = text.to_string();
                return Ok(output);
            }
            match command.as_str() {
                "ok" => Ok(ActionOutput::changed()),
                "unchanged" => Ok(ActionOutput::unchanged()),
                "fail" => bail!("scripted failure"),
                "flaky" => {
                    let mut remaining = self.flaky_remaining.lock().unwrap();
                    if *remaining > 0 {
                        *remaining -= 1;
                        bail!("flaky failure");
                    }
                    Ok(ActionOutput::changed())
                }
                other => bail!("unscripted command: {other}"),
            }
        }
    }

    fn executor_with_mock() -> (Executor, MockHandler) {
        let mock = MockHandler::default();
        let mut executor = Executor::new(ExecutorConfig {
            server_public_key: signing_key().verifying_key().as_bytes().to_vec(),
            device_id: "device-1".into(),
            platform: Some("linux".into()),
            on_progress: None,
        })
        .unwrap();
        executor.register_handler(types::ACTION_COMMAND, Box::new(mock.clone()));
        (executor, mock)
    }

    fn run(content: &str) -> (ExecutionReport, MockHandler) {
        let (executor, mock) = executor_with_mock();
        let report = executor.execute(&CancelToken::new(), &sign(content, PlaybookStatus::Approved));
        (report, mock)
    }

    #[test]
    fn completes_minimal_playbook() {
        let (report, mock) = run(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: ok }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.tasks_total, 1);
        assert_eq!(report.tasks_completed, 1);
        assert!(report.verification.all_checks_pass);
        assert_eq!(mock.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejected_playbook_never_reaches_handlers() {
        let (executor, mock) = executor_with_mock();
        let mut sp = sign(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: ok }\n",
            PlaybookStatus::Approved,
        );
        sp.content.push(' '); // hash no longer matches

        let report = executor.execute(&CancelToken::new(), &sp);
        assert_eq!(report.status, ReportStatus::Rejected);
        assert!(!report.verification.hash_verified);
        assert!(report.task_results.is_empty());
        assert!(mock.calls.lock().unwrap().is_empty());
        assert!(report.error_message.starts_with("SECURITY:"));
    }

    #[test]
    fn unapproved_playbook_is_rejected() {
        let (executor, mock) = executor_with_mock();
        let sp = sign(
            "name: hello\ntasks:\n  - name: noop\n    action: command\n    params: { command: ok }\n",
            PlaybookStatus::Pending,
        );
        let report = executor.execute(&CancelToken::new(), &sp);
        assert_eq!(report.status, ReportStatus::Rejected);
        assert!(!report.verification.approval_verified);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn parse_failure_is_failed_not_rejected() {
        let (report, _) = run("name: [broken");
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.verification.all_checks_pass);
        assert!(report.error_message.starts_with("Parse error:"));
    }

    #[test]
    fn platform_mismatch_is_rejected_after_verification() {
        let (report, mock) = run(
            "name: win-only\nplatforms: [windows]\ntasks:\n  - name: noop\n    action: command\n    params: { command: ok }\n",
        );
        assert_eq!(report.status, ReportStatus::Rejected);
        assert!(report.verification.all_checks_pass);
        assert!(report.error_message.contains("not supported"));
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn task_platform_filter_skips_without_dispatch() {
        let (report, mock) = run(
            "name: filtered\ntasks:\n  - name: win task\n    platform: windows\n    action: command\n    params: { command: ok }\n  - name: here\n    action: command\n    params: { command: ok }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.tasks_skipped, 1);
        assert_eq!(report.tasks_completed, 1);
        assert_eq!(report.task_results[0].status, TaskStatus::Skipped);
        // Only the second task reached the handler.
        assert_eq!(*mock.calls.lock().unwrap(), vec!["ok".to_string()]);
    }

    #[test]
    fn when_condition_gates_execution() {
        let (report, mock) = run(
            "name: cond\ntasks:\n  - name: probe\n    action: command\n    params: { command: echo installed }\n    register: probe\n  - name: yes\n    action: command\n    when: probe.stdout contains \"installed\"\n    params: { command: ok }\n  - name: no\n    action: command\n    when: probe.exit_code != 0\n    params: { command: fail }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.tasks_completed, 2);
        assert_eq!(report.tasks_skipped, 1);
        assert_eq!(
            *mock.calls.lock().unwrap(),
            vec!["echo installed".to_string(), "ok".to_string()]
        );
    }

    #[test]
    fn registered_results_are_visible_to_later_tasks() {
        let (report, _) = run(
            "name: reg\ntasks:\n  - name: probe\n    action: command\n    params: { command: echo v1.2 }\n    register: probe\n  - name: use\n    action: command\n    params: { command: \"echo got {{ probe.stdout }}\" }\n    register: second\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.task_results[1].stdout, "got v1.2");
    }

    #[test]
    fn earlier_tasks_cannot_see_later_registers() {
        let (report, _) = run(
            "name: reg\ntasks:\n  - name: early\n    action: command\n    params: { command: \"echo {{ later.stdout }}\" }\n  - name: late\n    action: command\n    params: { command: ok }\n    register: later\n",
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.task_results[0]
            .error
            .contains("variable substitution failed"));
    }

    #[test]
    fn notified_handlers_run_once_when_changed() {
        let (report, mock) = run(
            "name: notify\ntasks:\n  - name: change\n    action: command\n    params: { command: ok }\n    notify: [reload]\n  - name: also change\n    action: command\n    params: { command: ok }\n    notify: [reload]\nhandlers:\n  - name: reload\n    action: command\n    params: { command: echo reloading }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        let calls = mock.calls.lock().unwrap();
        assert_eq!(
            calls.iter().filter(|c| *c == "echo reloading").count(),
            1,
            "handler must run exactly once"
        );
        assert_eq!(report.task_results.len(), 3);
    }

    #[test]
    fn unchanged_tasks_do_not_notify() {
        let (report, mock) = run(
            "name: quiet\ntasks:\n  - name: nothing to do\n    action: command\n    params: { command: unchanged }\n    notify: [reload]\nhandlers:\n  - name: reload\n    action: command\n    params: { command: echo reloading }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert!(mock.calls.lock().unwrap().iter().all(|c| c == "unchanged"));
        assert_eq!(report.task_results.len(), 1);
    }

    #[test]
    fn retries_run_until_success() {
        let (executor, mock) = executor_with_mock();
        *mock.flaky_remaining.lock().unwrap() = 2;
        let report = executor.execute(
            &CancelToken::new(),
            &sign(
                "name: retry\ntasks:\n  - name: flaky\n    action: command\n    retries: 3\n    params: { command: flaky }\n",
                PlaybookStatus::Approved,
            ),
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(mock.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn retries_exhaust_to_failure() {
        let (report, mock) = run(
            "name: retry\ntasks:\n  - name: always fails\n    action: command\n    retries: 2\n    params: { command: fail }\n",
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(mock.calls.lock().unwrap().len(), 3);
        assert!(report.task_results[0].error.contains("scripted failure"));
    }

    #[test]
    fn ignore_errors_continues_past_failure() {
        let (report, _) = run(
            "name: tolerant\ntasks:\n  - name: fails\n    action: command\n    ignore_errors: true\n    params: { command: fail }\n  - name: runs\n    action: command\n    params: { command: ok }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.tasks_failed, 1);
        assert_eq!(report.tasks_completed, 1);
    }

    #[test]
    fn on_error_continue_keeps_going() {
        let (report, _) = run(
            "name: keep going\non_error: { strategy: continue }\ntasks:\n  - name: fails\n    action: command\n    params: { command: fail }\n  - name: runs\n    action: command\n    params: { command: ok }\n",
        );
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.tasks_failed, 1);
        assert_eq!(report.tasks_completed, 1);
    }

    #[test]
    fn on_error_stop_is_the_default() {
        let (report, mock) = run(
            "name: stop\ntasks:\n  - name: fails\n    action: command\n    params: { command: fail }\n  - name: never runs\n    action: command\n    params: { command: ok }\n",
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.task_results.len(), 1);
        assert_eq!(mock.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn on_error_rollback_unwinds_completed_tasks_in_reverse() {
        let (report, mock) = run(
            "name: unwind\non_error: { strategy: rollback }\ntasks:\n  - name: first\n    action: command\n    params: { command: ok }\n    rollback:\n      name: undo first\n      action: command\n      params: { command: echo undo-first }\n  - name: second\n    action: command\n    params: { command: ok }\n    rollback:\n      name: undo second\n      action: command\n      params: { command: echo undo-second }\n  - name: boom\n    action: command\n    params: { command: fail }\n",
        );
        assert_eq!(report.status, ReportStatus::Failed);
        let calls = mock.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "ok".to_string(),
                "ok".to_string(),
                "fail".to_string(),
                "echo undo-second".to_string(),
                "echo undo-first".to_string(),
            ]
        );
        // Rollback results are appended to the report for audit.
        assert_eq!(report.task_results.len(), 5);
        assert!(report.error_message.contains("task 'boom' failed"));
    }

    #[test]
    fn per_task_rollback_annotates_the_failure() {
        let (report, mock) = run(
            "name: local undo\ntasks:\n  - name: fails\n    action: command\n    params: { command: fail }\n    rollback:\n      name: undo\n      action: command\n      params: { command: echo undone }\n",
        );
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.task_results[0].message, "Rollback executed successfully");
        assert!(mock.calls.lock().unwrap().contains(&"echo undone".to_string()));
    }

    #[test]
    fn cancellation_before_a_task_stops_the_run() {
        let (executor, mock) = executor_with_mock();
        let token = CancelToken::new();
        token.cancel();
        let report = executor.execute(
            &token,
            &sign(
                "name: cancelled\ntasks:\n  - name: never\n    action: command\n    params: { command: ok }\n",
                PlaybookStatus::Approved,
            ),
        );
        assert_eq!(report.status, ReportStatus::Cancelled);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn progress_reports_one_running_and_one_terminal_per_task() {
        let events: Arc<Mutex<Vec<(String, TaskStatus)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let mock = MockHandler::default();
        let mut executor = Executor::new(ExecutorConfig {
            server_public_key: signing_key().verifying_key().as_bytes().to_vec(),
            device_id: "device-1".into(),
            platform: Some("linux".into()),
            on_progress: Some(Box::new(move |name, status| {
                sink.lock().unwrap().push((name.to_string(), status));
            })),
        })
        .unwrap();
        executor.register_handler(types::ACTION_COMMAND, Box::new(mock));

        let report = executor.execute(
            &CancelToken::new(),
            &sign(
                "name: progress\ntasks:\n  - name: one\n    action: command\n    params: { command: ok }\n  - name: two\n    platform: windows\n    action: command\n    params: { command: ok }\n",
                PlaybookStatus::Approved,
            ),
        );
        assert_eq!(report.status, ReportStatus::Completed);
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ("one".to_string(), TaskStatus::Running),
                ("one".to_string(), TaskStatus::Completed),
                ("two".to_string(), TaskStatus::Running),
                ("two".to_string(), TaskStatus::Skipped),
            ]
        );
    }

    #[test]
    fn dry_run_verifies_and_simulates_without_dispatch() {
        let (executor, mock) = executor_with_mock();
        let report = executor.dry_run(&sign(
            "name: rehearsal\ntasks:\n  - name: would run\n    action: command\n    params: { command: ok }\n  - name: elsewhere\n    platform: windows\n    action: command\n    params: { command: ok }\n",
            PlaybookStatus::Approved,
        ));
        assert_eq!(report.status, ReportStatus::DryRunOk);
        assert!(report.verification.all_checks_pass);
        assert!(mock.calls.lock().unwrap().is_empty());
        assert_eq!(report.task_results[0].status, TaskStatus::Pending);
        assert_eq!(report.task_results[1].status, TaskStatus::Skipped);
    }

    #[test]
    fn dry_run_still_requires_verification() {
        let (executor, _) = executor_with_mock();
        let mut sp = sign(
            "name: rehearsal\ntasks:\n  - name: t\n    action: command\n    params: { command: ok }\n",
            PlaybookStatus::Approved,
        );
        sp.signature.reverse();
        let report = executor.dry_run(&sp);
        assert_eq!(report.status, ReportStatus::Rejected);
        assert!(report.task_results.is_empty());
    }

    #[test]
    fn dry_run_flags_invalid_conditions() {
        let (executor, _) = executor_with_mock();
        let report = executor.dry_run(&sign(
            "name: rehearsal\ntasks:\n  - name: bad\n    action: command\n    when: \"(a == b\"\n    params: { command: ok }\n",
            PlaybookStatus::Approved,
        ));
        assert_eq!(report.status, ReportStatus::DryRunFailed);
        assert!(report.task_results[0].error.contains("Invalid condition"));
    }
}
