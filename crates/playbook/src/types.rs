//! Core types: the playbook AST, the signed envelope, and execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Version of the playbook schema supported by this agent.
pub const SCHEMA_VERSION: &str = "1.0";

/// Platform names used in playbook targeting.
pub const PLATFORM_WINDOWS: &str = "windows";
pub const PLATFORM_LINUX: &str = "linux";
pub const PLATFORM_DARWIN: &str = "darwin";
pub const PLATFORM_ANDROID: &str = "android";

/// All valid targeting platforms.
pub const PLATFORMS: &[&str] = &[
    PLATFORM_WINDOWS,
    PLATFORM_LINUX,
    PLATFORM_DARWIN,
    PLATFORM_ANDROID,
];

/// Action tags recognized by the engine.
pub const ACTION_COMMAND: &str = "command";
pub const ACTION_FILE: &str = "file";
pub const ACTION_LINEINFILE: &str = "lineinfile";
pub const ACTION_BLOCKINFILE: &str = "blockinfile";
pub const ACTION_ENV: &str = "env";
pub const ACTION_SERVICE: &str = "service";
pub const ACTION_REGISTRY: &str = "registry";
pub const ACTION_SYSCTL: &str = "sysctl";
pub const ACTION_DEFAULTS: &str = "defaults";
pub const ACTION_SETTINGS: &str = "settings";
pub const ACTION_PACKAGE: &str = "package";

/// The playbook targeting platform for this build, in playbook vocabulary.
///
/// Rust calls macOS "macos"; playbooks use the historical "darwin".
pub fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => PLATFORM_DARWIN,
        other => other,
    }
}

/// Heterogeneous action parameters: string, bool, number, sequence or
/// nested mapping, exactly as written in the YAML.
pub type Params = HashMap<String, serde_yaml::Value>;

/// A complete playbook definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Playbook {
    /// Schema version for compatibility checking.
    #[serde(default)]
    pub version: String,

    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,

    /// Targeting: windows, linux, darwin, android. Empty = any.
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_agent_version: String,

    #[serde(default)]
    pub requires_reboot: bool,
    #[serde(default)]
    pub requires_admin: bool,

    /// Variables defined in the playbook.
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Tasks to execute in order.
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Handlers, triggered by notify, run at most once at the end.
    #[serde(default)]
    pub handlers: Vec<Task>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<CompletionPolicy>,
}

/// A single action to execute.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Task {
    pub name: String,
    /// Optional identifier for result referencing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Single-platform filter; empty = any supported.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,

    /// Condition expression gating execution.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub when: String,

    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: Params,

    /// Variable name under which the task result is registered.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub register: String,

    /// Display hint for the control plane UI; opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultDefinition>,

    #[serde(default)]
    pub ignore_errors: bool,
    #[serde(default)]
    pub retries: i64,
    /// Seconds between attempts.
    #[serde(default)]
    pub retry_delay: i64,

    /// Handler names to mark dirty when this task completes with changes.
    #[serde(default)]
    pub notify: Vec<String>,

    /// Executed if this task terminally fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Box<Task>>,
}

/// How a task's output should be displayed in the results UI.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResultDefinition {
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Optional extraction pattern applied to stdout by the UI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extract: String,
}

/// Error handling policy for the whole playbook.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorPolicy {
    /// stop (default), continue, or rollback.
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub notify_server: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Post-execution behavior hints.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompletionPolicy {
    #[serde(default)]
    pub reboot_prompt: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// A playbook wrapped with its security metadata, as received from the
/// control plane. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignedPlaybook {
    /// Raw YAML content. The hash and signature cover these exact bytes.
    pub content: String,

    /// Hex-encoded SHA-256 of `content`.
    pub sha256_hash: String,
    /// Ed25519 signature over the raw 32 digest bytes.
    #[serde(with = "signature_bytes")]
    pub signature: Vec<u8>,
    /// Must verify as approved (or test) before execution.
    #[serde(default)]
    pub status: PlaybookStatus,

    pub playbook_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub approved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

/// Approval lifecycle of a playbook on the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybookStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Deprecated,
    /// Test runs are authorized out-of-band; the signature still binds content.
    Test,
}

impl fmt::Display for PlaybookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybookStatus::Pending => "pending",
            PlaybookStatus::Approved => "approved",
            PlaybookStatus::Rejected => "rejected",
            PlaybookStatus::Deprecated => "deprecated",
            PlaybookStatus::Test => "test",
        };
        f.write_str(s)
    }
}

/// Execution status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub task_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,

    pub status: TaskStatus,
    /// Whether the host's observable state was mutated.
    pub changed: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Display hint copied from the task definition, for the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_meta: Option<ResultDefinition>,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Human-readable, e.g. "1.5s".
    pub duration: String,
}

impl TaskResult {
    /// A fresh result for a task that is about to run.
    pub fn started(task: &Task) -> Self {
        TaskResult {
            task_name: task.name.clone(),
            task_id: task.id.clone(),
            status: TaskStatus::Pending,
            result_meta: task.result.clone(),
            start_time: Utc::now(),
            ..Default::default()
        }
    }
}

/// Overall status of an execution report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Rejected,
    Cancelled,
    DryRun,
    DryRunOk,
    DryRunFailed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Running => "running",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Cancelled => "cancelled",
            ReportStatus::DryRun => "dry_run",
            ReportStatus::DryRunOk => "dry_run_ok",
            ReportStatus::DryRunFailed => "dry_run_failed",
        };
        f.write_str(s)
    }
}

/// The full report sent back to the control plane.
///
/// Always carries the [`VerificationRecord`], even when the playbook was
/// rejected before anything ran.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionReport {
    pub playbook_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub playbook_name: String,

    pub device_id: String,

    pub verification: VerificationRecord,

    pub status: ReportStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration: String,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,

    #[serde(default)]
    pub task_results: Vec<TaskResult>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,

    pub reboot_required: bool,
}

impl ExecutionReport {
    /// Whether the execution converged without failures.
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ReportStatus::Completed | ReportStatus::DryRunOk)
    }
}

/// Audit artifact documenting the security checks performed on a playbook.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VerificationRecord {
    pub expected_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub calculated_hash: String,
    pub hash_verified: bool,

    pub signature_verified: bool,

    pub approval_status: PlaybookStatus,
    pub approval_verified: bool,

    pub all_checks_pass: bool,
    pub verified_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
}

/// Serde adapter: the wire form of the detached signature is base64, the
/// in-memory form is raw bytes.
mod signature_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_platform_is_known() {
        let p = current_platform();
        // On every platform this agent targets, the name must be one the
        // playbook schema understands.
        if cfg!(any(
            target_os = "windows",
            target_os = "linux",
            target_os = "macos",
            target_os = "android"
        )) {
            assert!(PLATFORMS.contains(&p));
        }
    }

    #[test]
    fn playbook_status_roundtrip() {
        for (status, wire) in [
            (PlaybookStatus::Pending, "\"pending\""),
            (PlaybookStatus::Approved, "\"approved\""),
            (PlaybookStatus::Test, "\"test\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), wire);
            let back: PlaybookStatus = serde_json::from_str(wire).unwrap();
            assert_eq!(back, status);
        }
    }

    #[test]
    fn report_status_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::DryRunOk).unwrap(),
            "\"dry_run_ok\""
        );
    }

    #[test]
    fn signed_playbook_signature_is_base64_on_the_wire() {
        let sp = SignedPlaybook {
            content: "name: x".into(),
            sha256_hash: "00".into(),
            signature: vec![1, 2, 3, 4],
            status: PlaybookStatus::Approved,
            playbook_id: "pb-1".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&sp).unwrap();
        assert!(json.contains("\"signature\":\"AQIDBA==\""));
        let back: SignedPlaybook = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signature, vec![1, 2, 3, 4]);
    }

    #[test]
    fn task_defaults_are_permissive() {
        let yaml = "name: t\naction: command\nparams:\n  command: \"true\"\n";
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.retries, 0);
        assert_eq!(task.retry_delay, 0);
        assert!(!task.ignore_errors);
        assert!(task.notify.is_empty());
        assert!(task.rollback.is_none());
    }
}
