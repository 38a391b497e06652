//! Shell command action.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

use super::{ActionHandler, ActionOutput, CommandFailed, bool_param, int_param, str_param};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: i64 = 300;

/// How often the child process is polled for exit, cancellation or timeout.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Runs a command through the platform shell, capturing output.
pub struct CommandHandler;

impl ActionHandler for CommandHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["all"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("command") {
            anyhow::bail!("command action requires 'command' parameter");
        }
        Ok(())
    }

    fn execute(
        &self,
        token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        let command = super::required_str(params, "command")?;

        // `creates` short-circuits for idempotency: if the artifact already
        // exists the command is assumed to have run before.
        if let Some(creates) = str_param(params, "creates") {
            if !creates.is_empty() && std::path::Path::new(creates).exists() {
                return Ok(
                    ActionOutput::unchanged().with_message(format!(
                        "Skipped: '{creates}' already exists"
                    )),
                );
            }
        }

        let timeout_secs = int_param(params, "timeout")
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = Duration::from_secs(timeout_secs as u64);

        let (shell, shell_args) = shell_invocation(str_param(params, "shell"));
        let mut cmd = Command::new(shell);
        cmd.args(shell_args)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = str_param(params, "chdir") {
            if !dir.is_empty() {
                cmd.current_dir(dir);
            }
        }

        if let Some(env) = params.get("environment").and_then(|v| v.as_mapping()) {
            for (key, value) in env {
                if let (Some(key), Some(value)) = (key.as_str(), value.as_str()) {
                    cmd.env(key, value);
                }
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn shell '{shell}'"))?;

        // Drain the pipes from separate threads while polling for exit, so
        // a chatty child can never block on a full pipe buffer.
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());
        let wait = wait_with_deadline(&mut child, token, timeout);
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        let status = match wait {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::TimedOut => {
                return Err(CommandFailed {
                    message: format!("command timed out after {timeout_secs}s"),
                    stdout,
                    stderr,
                    exit_code: -1,
                }
                .into());
            }
            WaitOutcome::Cancelled => {
                return Err(CommandFailed {
                    message: "command cancelled".into(),
                    stdout,
                    stderr,
                    exit_code: -1,
                }
                .into());
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let mut output = ActionOutput {
            // Commands are assumed to change the host; `creates` is the
            // playbook's lever for claiming otherwise.
            changed: true,
            stdout,
            stderr,
            exit_code,
            message: String::new(),
        };

        if !status.success() {
            if bool_param(params, "fail_on_error", true) {
                return Err(CommandFailed {
                    message: format!(
                        "command failed with exit code {exit_code}: {}",
                        output.stderr
                    ),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code,
                }
                .into());
            }
            // Non-zero exit tolerated by the playbook.
            return Ok(output);
        }

        output.exit_code = 0;
        Ok(output)
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Poll the child until exit, cancellation or deadline. On interruption the
/// child is killed and reaped.
fn wait_with_deadline(child: &mut Child, token: &CancelToken, timeout: Duration) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {}
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return WaitOutcome::Cancelled;
            }
        }
        if token.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return WaitOutcome::Cancelled;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return WaitOutcome::TimedOut;
        }
        std::thread::sleep(WAIT_POLL);
    }
}

/// Read one pipe to completion on its own thread. Output is trimmed; the
/// playbook cares about content, not trailing newlines.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf.trim().to_string()
    })
}

/// Map the `shell` parameter to an invocation, with a per-platform default.
fn shell_invocation(shell: Option<&str>) -> (&'static str, &'static [&'static str]) {
    match shell {
        None | Some("") => {
            if cfg!(windows) {
                ("cmd", &["/C"])
            } else {
                ("/bin/sh", &["-c"])
            }
        }
        Some("powershell") | Some("pwsh") => (
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command"],
        ),
        Some("bash") => ("/bin/bash", &["-c"]),
        Some("cmd") => ("cmd", &["/C"]),
        _ => ("/bin/sh", &["-c"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(yaml: &str) -> Params {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn run(yaml: &str) -> Result<ActionOutput> {
        CommandHandler.execute(&CancelToken::new(), &params(yaml), &Variables::new())
    }

    #[test]
    fn validate_requires_command() {
        assert!(CommandHandler.validate(&params("command: ls")).is_ok());
        assert!(CommandHandler.validate(&params("chdir: /tmp")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_exit_code() {
        let output = run("command: echo hello").unwrap();
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.exit_code, 0);
        assert!(output.changed);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_an_error_with_captured_output() {
        let err = run("command: \"echo oops >&2; exit 3\"").unwrap_err();
        let failed = err.downcast_ref::<CommandFailed>().unwrap();
        assert_eq!(failed.exit_code, 3);
        assert_eq!(failed.stderr, "oops");
    }

    #[cfg(unix)]
    #[test]
    fn fail_on_error_false_tolerates_nonzero_exit() {
        let output = run("command: exit 3\nfail_on_error: false").unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.changed);
    }

    #[cfg(unix)]
    #[test]
    fn creates_skips_when_artifact_exists() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        std::fs::write(&marker, "x").unwrap();
        let output = run(&format!(
            "command: \"echo ran\"\ncreates: \"{}\"",
            marker.display()
        ))
        .unwrap();
        assert!(!output.changed);
        assert!(output.stdout.is_empty(), "command must not have run");
    }

    #[cfg(unix)]
    #[test]
    fn environment_param_reaches_the_child() {
        let output = run("command: \"echo $DROVER_CMD_TEST\"\nenvironment:\n  DROVER_CMD_TEST: marker\n")
            .unwrap();
        assert_eq!(output.stdout, "marker");
    }

    #[cfg(unix)]
    #[test]
    fn chdir_changes_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(&format!("command: pwd\nchdir: \"{}\"", dir.path().display())).unwrap();
        // Canonicalize to survive symlinked temp dirs (macOS /tmp).
        assert_eq!(
            std::fs::canonicalize(&output.stdout).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_child() {
        let start = Instant::now();
        let err = run("command: sleep 10\ntimeout: 1").unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(8));
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_kills_the_child() {
        let token = CancelToken::new();
        let remote = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });
        let start = Instant::now();
        let err = CommandHandler
            .execute(&token, &params("command: sleep 10"), &Variables::new())
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(8));
        assert!(err.to_string().contains("cancelled"));
    }

    #[cfg(unix)]
    #[test]
    fn bash_shell_is_selectable() {
        let output = run("command: \"echo $0\"\nshell: bash").unwrap();
        assert_eq!(output.stdout, "/bin/bash");
    }
}
