//! Service management action.
//!
//! Probes and drives the platform service manager: `systemctl` (with a SysV
//! `service` fallback) on Linux, `sc` on Windows, `launchctl` on macOS.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};

use super::{ActionHandler, ActionOutput, str_param};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

pub struct ServiceHandler;

impl ActionHandler for ServiceHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["windows", "linux", "darwin"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("name") {
            bail!("service action requires 'name' parameter");
        }
        Ok(())
    }

    fn execute(
        &self,
        _token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        let name = super::required_str(params, "name")?;
        let state = str_param(params, "state").unwrap_or("");

        // `enabled` is orthogonal to the run state and may arrive as a
        // YAML bool or a yes/no string.
        let enabled = match params.get("enabled") {
            Some(serde_yaml::Value::Bool(b)) => Some(*b),
            Some(serde_yaml::Value::String(s)) => match s.as_str() {
                "yes" | "true" => Some(true),
                "no" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        };

        let mut changed = false;

        if !state.is_empty() {
            changed |= match state {
                "started" => ensure_started(name)?,
                "stopped" => ensure_stopped(name)?,
                "restarted" => restart(name)?,
                "reloaded" => reload(name)?,
                other => bail!("unknown state '{other}'"),
            };
        }

        if let Some(enabled) = enabled {
            changed |= set_enabled(name, enabled)?;
        }

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }
}

fn ensure_started(name: &str) -> Result<bool> {
    if is_running(name)? {
        return Ok(false);
    }
    start(name)?;
    Ok(true)
}

fn ensure_stopped(name: &str) -> Result<bool> {
    if !is_running(name)? {
        return Ok(false);
    }
    stop(name)?;
    Ok(true)
}

fn is_running(name: &str) -> Result<bool> {
    if cfg!(windows) {
        let Ok(output) = Command::new("sc").args(["query", name]).output() else {
            return Ok(false);
        };
        return Ok(String::from_utf8_lossy(&output.stdout).contains("RUNNING"));
    }

    if cfg!(target_os = "macos") {
        let status = Command::new("launchctl")
            .args(["list", name])
            .status()
            .context("failed to execute launchctl")?;
        return Ok(status.success());
    }

    // Linux: systemctl, then SysV service status.
    if let Ok(status) = Command::new("systemctl")
        .args(["is-active", "--quiet", name])
        .status()
    {
        if status.success() {
            return Ok(true);
        }
    }
    let Ok(output) = Command::new("service").args([name, "status"]).output() else {
        return Ok(false);
    };
    Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).contains("running"))
}

fn start(name: &str) -> Result<()> {
    if cfg!(windows) {
        return run_manager("sc", &["start", name]);
    }
    if cfg!(target_os = "macos") {
        return run_manager("launchctl", &["start", name]);
    }
    run_manager("systemctl", &["start", name])
        .or_else(|_| run_manager("service", &[name, "start"]))
}

fn stop(name: &str) -> Result<()> {
    if cfg!(windows) {
        return run_manager("sc", &["stop", name]);
    }
    if cfg!(target_os = "macos") {
        return run_manager("launchctl", &["stop", name]);
    }
    run_manager("systemctl", &["stop", name]).or_else(|_| run_manager("service", &[name, "stop"]))
}

fn restart(name: &str) -> Result<bool> {
    if cfg!(windows) {
        // No restart verb in sc: stop, settle, start.
        let _ = Command::new("sc").args(["stop", name]).status();
        std::thread::sleep(Duration::from_secs(2));
        run_manager("sc", &["start", name])?;
        return Ok(true);
    }
    if cfg!(target_os = "macos") {
        let _ = Command::new("launchctl").args(["stop", name]).status();
        std::thread::sleep(Duration::from_secs(1));
        run_manager("launchctl", &["start", name])?;
        return Ok(true);
    }
    run_manager("systemctl", &["restart", name])
        .or_else(|_| run_manager("service", &[name, "restart"]))?;
    Ok(true)
}

fn reload(name: &str) -> Result<bool> {
    if cfg!(windows) {
        // Windows has no reload concept.
        return restart(name);
    }
    if cfg!(target_os = "macos") {
        if run_manager("launchctl", &["kickstart", "-k", name]).is_ok() {
            return Ok(true);
        }
        return restart(name);
    }
    if run_manager("systemctl", &["reload", name]).is_ok() {
        return Ok(true);
    }
    // Unit may not support reload.
    restart(name)
}

fn set_enabled(name: &str, enabled: bool) -> Result<bool> {
    if cfg!(windows) {
        let start_type = if enabled { "auto" } else { "disabled" };
        run_manager("sc", &["config", name, "start=", start_type])?;
        return Ok(true);
    }
    if cfg!(target_os = "macos") {
        let verb = if enabled { "load" } else { "unload" };
        run_manager("launchctl", &[verb, "-w", name])?;
        return Ok(true);
    }
    let verb = if enabled { "enable" } else { "disable" };
    run_manager("systemctl", &[verb, name])?;
    Ok(true)
}

fn run_manager(tool: &str, args: &[&str]) -> Result<()> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute {tool}"))?;
    if !output.status.success() {
        bail!(
            "{tool} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_name() {
        let with: Params = serde_yaml::from_str("name: sshd").unwrap();
        let without: Params = serde_yaml::from_str("state: started").unwrap();
        assert!(ServiceHandler.validate(&with).is_ok());
        assert!(ServiceHandler.validate(&without).is_err());
    }

    #[test]
    fn rejects_unknown_state() {
        let params: Params = serde_yaml::from_str("name: sshd\nstate: paused").unwrap();
        let err = ServiceHandler
            .execute(&CancelToken::new(), &params, &Variables::new())
            .unwrap_err();
        assert!(err.to_string().contains("unknown state"));
    }

    #[test]
    fn does_not_claim_android_support() {
        assert!(!ServiceHandler.supports().contains(&"android"));
        assert!(!ServiceHandler.supports().contains(&"all"));
    }
}
