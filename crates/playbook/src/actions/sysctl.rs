//! Linux kernel parameter action.
//!
//! Reads and applies live values through `/proc/sys`, and persists them by
//! upserting a drop-in under `/etc/sysctl.d/`.

use anyhow::{Result, bail};

use super::{ActionHandler, ActionOutput};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

/// Default persistence file for values this agent manages.
pub const DEFAULT_SYSCTL_FILE: &str = "/etc/sysctl.d/99-drover.conf";

pub struct SysctlHandler;

impl ActionHandler for SysctlHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["linux"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("name") {
            bail!("sysctl action requires 'name' parameter");
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn execute(
        &self,
        _token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        imp::execute(params)
    }

    #[cfg(not(target_os = "linux"))]
    fn execute(
        &self,
        _token: &CancelToken,
        _params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        bail!("sysctl action is only available on Linux")
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::fs;
    use std::path::Path;
    use std::process::Command;

    use anyhow::{Context as _, Result, bail};

    use super::super::file::write_atomic;
    use super::super::{ActionOutput, bool_param, str_param, value_to_string};
    use super::DEFAULT_SYSCTL_FILE;
    use crate::types::Params;

    pub fn execute(params: &Params) -> Result<ActionOutput> {
        let name = super::super::required_str(params, "name")?;
        let state = str_param(params, "state").unwrap_or("present");
        let sysctl_file = str_param(params, "sysctl_file").unwrap_or(DEFAULT_SYSCTL_FILE);

        let changed = match state {
            "present" => {
                let value = params
                    .get("value")
                    .map(value_to_string)
                    .ok_or_else(|| {
                        anyhow::anyhow!("'value' parameter required for state 'present'")
                    })?;
                let persist = bool_param(params, "sysctl_set", true);
                let reload = bool_param(params, "reload", true);
                ensure_present(name, &value, persist, reload, sysctl_file)?
            }
            "absent" => ensure_absent(name, sysctl_file)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }

    fn ensure_present(
        name: &str,
        value: &str,
        persist: bool,
        reload: bool,
        sysctl_file: &str,
    ) -> Result<bool> {
        let mut changed = false;

        let current = current_value(name).unwrap_or_default();
        if current.trim() != value.trim() && reload {
            apply_value(name, value)
                .with_context(|| format!("failed to apply sysctl value {name}={value}"))?;
            changed = true;
        }

        if persist && persist_value(name, value, sysctl_file)? {
            changed = true;
        }
        Ok(changed)
    }

    fn ensure_absent(name: &str, sysctl_file: &str) -> Result<bool> {
        let content = match fs::read_to_string(sysctl_file) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let mut found = false;
        let kept: Vec<&str> = content
            .split('\n')
            .filter(|line| {
                if is_entry_for(line, name) {
                    found = true;
                    false
                } else {
                    true
                }
            })
            .collect();

        if !found {
            return Ok(false);
        }
        write_atomic(sysctl_file, kept.join("\n").as_bytes())?;
        Ok(true)
    }

    fn proc_path(name: &str) -> String {
        format!("/proc/sys/{}", name.replace('.', "/"))
    }

    fn current_value(name: &str) -> Option<String> {
        if let Ok(content) = fs::read_to_string(proc_path(name)) {
            return Some(content.trim().to_string());
        }
        let output = Command::new("sysctl").args(["-n", name]).output().ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn apply_value(name: &str, value: &str) -> Result<()> {
        if fs::write(proc_path(name), value).is_ok() {
            return Ok(());
        }
        let status = Command::new("sysctl")
            .args(["-w", &format!("{name}={value}")])
            .status()
            .context("failed to execute sysctl")?;
        if !status.success() {
            bail!("sysctl -w {name}={value} failed");
        }
        Ok(())
    }

    /// Upsert `name = value` into the drop-in file. Returns whether the
    /// file changed.
    fn persist_value(name: &str, value: &str, sysctl_file: &str) -> Result<bool> {
        if let Some(dir) = Path::new(sysctl_file).parent() {
            fs::create_dir_all(dir).with_context(|| "failed to create sysctl.d directory")?;
        }

        let content = match fs::read_to_string(sysctl_file) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let target = format!("{name} = {value}");
        let mut lines: Vec<String> = content.split('\n').map(String::from).collect();

        for line in lines.iter_mut() {
            if is_entry_for(line, name) {
                let existing = line
                    .splitn(2, '=')
                    .nth(1)
                    .map(str::trim)
                    .unwrap_or_default();
                if existing == value {
                    return Ok(false);
                }
                *line = target;
                write_atomic(sysctl_file, ensure_trailing_newline(lines.join("\n")).as_bytes())?;
                return Ok(true);
            }
        }

        if lines.last().map(|l| l.is_empty()).unwrap_or(false) {
            lines.pop();
        }
        lines.push(target);
        write_atomic(sysctl_file, ensure_trailing_newline(lines.join("\n")).as_bytes())?;
        Ok(true)
    }

    fn is_entry_for(line: &str, name: &str) -> bool {
        let trimmed = line.trim();
        trimmed.starts_with(&format!("{name} ")) || trimmed.starts_with(&format!("{name}="))
    }

    fn ensure_trailing_newline(mut content: String) -> String {
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn persist_upserts_and_is_idempotent() {
            let dir = tempfile::tempdir().unwrap();
            let file = dir.path().join("99-test.conf");
            let file = file.to_str().unwrap();

            assert!(persist_value("vm.swappiness", "10", file).unwrap());
            assert_eq!(fs::read_to_string(file).unwrap(), "vm.swappiness = 10\n");

            assert!(!persist_value("vm.swappiness", "10", file).unwrap());

            assert!(persist_value("vm.swappiness", "20", file).unwrap());
            let content = fs::read_to_string(file).unwrap();
            assert_eq!(content.matches("vm.swappiness").count(), 1);
            assert!(content.contains("= 20"));
        }

        #[test]
        fn absent_removes_only_the_entry() {
            let dir = tempfile::tempdir().unwrap();
            let file = dir.path().join("99-test.conf");
            fs::write(&file, "net.ipv4.ip_forward = 1\nvm.swappiness = 10\n").unwrap();
            let file = file.to_str().unwrap();

            assert!(ensure_absent("vm.swappiness", file).unwrap());
            let content = fs::read_to_string(file).unwrap();
            assert!(content.contains("ip_forward"));
            assert!(!content.contains("swappiness"));

            assert!(!ensure_absent("vm.swappiness", file).unwrap());
        }

        #[test]
        fn proc_path_maps_dots_to_slashes() {
            assert_eq!(proc_path("net.ipv4.ip_forward"), "/proc/sys/net/ipv4/ip_forward");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_name() {
        let with: Params = serde_yaml::from_str("name: vm.swappiness").unwrap();
        let without: Params = serde_yaml::from_str("value: 10").unwrap();
        assert!(SysctlHandler.validate(&with).is_ok());
        assert!(SysctlHandler.validate(&without).is_err());
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn refuses_off_linux() {
        let params: Params = serde_yaml::from_str("name: vm.swappiness\nvalue: 10").unwrap();
        let err = SysctlHandler
            .execute(&CancelToken::new(), &params, &Variables::new())
            .unwrap_err();
        assert!(err.to_string().contains("only available on Linux"));
    }
}
