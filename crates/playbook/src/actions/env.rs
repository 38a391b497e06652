//! Environment variable action.
//!
//! Three scopes: `process` (this agent only), `user` and `system`.
//! Persistence is OS-specific: Windows goes through the environment
//! registry via PowerShell, Unix edits the user's shell profile, and
//! system scope uses `/etc/profile.d/` on Linux and `launchctl setenv` on
//! macOS.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context as _, Result, bail};

use super::file::write_atomic;
use super::{ActionHandler, ActionOutput, str_param, value_to_string};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

/// Profile snippet used for system scope on Linux.
const SYSTEM_PROFILE: &str = "/etc/profile.d/drover.sh";

pub struct EnvHandler;

impl ActionHandler for EnvHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["all"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("name") {
            bail!("env action requires 'name' parameter");
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
        let state = str_param(params, "state").unwrap_or("present");
        let scope = str_param(params, "scope").unwrap_or("user");

        let changed = match state {
            "present" => {
                let value = params
                    .get("value")
                    .map(value_to_string)
                    .ok_or_else(|| anyhow::anyhow!("'value' parameter required for state 'present'"))?;
                ensure_present(name, &value, scope)?
            }
            "absent" => ensure_absent(name, scope)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }
}

fn ensure_present(name: &str, value: &str, scope: &str) -> Result<bool> {
    // Present at the right value already: nothing to do.
    if std::env::var(name).map(|v| v == value).unwrap_or(false) && scope == "process" {
        return Ok(false);
    }

    match scope {
        "process" => {
            // SAFETY: the executor is single-threaded and handlers run
            // sequentially; no concurrent reads of the environment.
            unsafe { std::env::set_var(name, value) };
            Ok(true)
        }
        "user" => set_user_env(name, value),
        "system" => set_system_env(name, value),
        other => bail!("unknown scope '{other}'"),
    }
}

fn ensure_absent(name: &str, scope: &str) -> Result<bool> {
    match scope {
        "process" => {
            if std::env::var_os(name).is_none() {
                return Ok(false);
            }
            // SAFETY: see ensure_present.
            unsafe { std::env::remove_var(name) };
            Ok(true)
        }
        "user" => remove_user_env(name),
        "system" => remove_system_env(name),
        other => bail!("unknown scope '{other}'"),
    }
}

fn set_user_env(name: &str, value: &str) -> Result<bool> {
    if cfg!(windows) {
        powershell_setenv(name, Some(value), "User")?;
        return Ok(true);
    }
    upsert_profile(&user_profile()?, name, value)
}

fn set_system_env(name: &str, value: &str) -> Result<bool> {
    if cfg!(windows) {
        powershell_setenv(name, Some(value), "Machine")?;
        return Ok(true);
    }
    if cfg!(target_os = "macos") {
        run_tool("launchctl", &["setenv", name, value])?;
        return Ok(true);
    }
    upsert_profile(Path::new(SYSTEM_PROFILE), name, value)
}

fn remove_user_env(name: &str) -> Result<bool> {
    if cfg!(windows) {
        powershell_setenv(name, None, "User")?;
        return Ok(true);
    }
    remove_from_profile(&user_profile()?, name)
}

fn remove_system_env(name: &str) -> Result<bool> {
    if cfg!(windows) {
        powershell_setenv(name, None, "Machine")?;
        return Ok(true);
    }
    if cfg!(target_os = "macos") {
        run_tool("launchctl", &["unsetenv", name])?;
        return Ok(true);
    }
    remove_from_profile(Path::new(SYSTEM_PROFILE), name)
}

/// The profile file of the user's login shell.
fn user_profile() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    let shell = std::env::var("SHELL").unwrap_or_default();
    Ok(if shell.contains("zsh") {
        home.join(".zshrc")
    } else if shell.contains("fish") {
        home.join(".config").join("fish").join("config.fish")
    } else {
        home.join(".bashrc")
    })
}

/// Add or update an `export NAME="value"` line.
fn upsert_profile(profile: &Path, name: &str, value: &str) -> Result<bool> {
    if let Some(dir) = profile.parent() {
        fs::create_dir_all(dir).with_context(|| "failed to create directory")?;
    }

    let content = match fs::read_to_string(profile) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    let export_line = format!("export {name}=\"{value}\"");
    let prefix = format!("export {name}=");
    let mut lines: Vec<String> = content.split('\n').map(String::from).collect();

    for line in lines.iter_mut() {
        if line.trim().starts_with(&prefix) {
            if line.trim() == export_line {
                return Ok(false);
            }
            *line = export_line;
            write_atomic(&profile.to_string_lossy(), lines.join("\n").as_bytes())?;
            return Ok(true);
        }
    }

    let mut new_content = content;
    if !new_content.is_empty() && !new_content.ends_with('\n') {
        new_content.push('\n');
    }
    new_content.push_str(&export_line);
    new_content.push('\n');
    write_atomic(&profile.to_string_lossy(), new_content.as_bytes())?;
    Ok(true)
}

fn remove_from_profile(profile: &Path, name: &str) -> Result<bool> {
    let content = match fs::read_to_string(profile) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    let prefix = format!("export {name}=");
    let mut found = false;
    let kept: Vec<&str> = content
        .split('\n')
        .filter(|line| {
            if line.trim().starts_with(&prefix) {
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
    write_atomic(&profile.to_string_lossy(), kept.join("\n").as_bytes())?;
    Ok(true)
}

/// Set (`Some`) or clear (`None`) a variable in the Windows environment
/// registry at the given target.
fn powershell_setenv(name: &str, value: Option<&str>, target: &str) -> Result<()> {
    let value_expr = match value {
        Some(value) => format!("'{}'", value.replace('\'', "''")),
        None => "$null".to_string(),
    };
    let script = format!(
        "[Environment]::SetEnvironmentVariable('{}', {value_expr}, '{target}')",
        name.replace('\'', "''")
    );
    run_tool("powershell", &["-NoProfile", "-Command", &script])
}

fn run_tool(tool: &str, args: &[&str]) -> Result<()> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute {tool}"))?;
    if !output.status.success() {
        bail!(
            "{tool} failed: {}",
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
        let with: Params = serde_yaml::from_str("name: PATHX").unwrap();
        let without: Params = serde_yaml::from_str("value: x").unwrap();
        assert!(EnvHandler.validate(&with).is_ok());
        assert!(EnvHandler.validate(&without).is_err());
    }

    #[test]
    fn present_requires_value() {
        let params: Params = serde_yaml::from_str("name: DROVER_ENV_T1").unwrap();
        let err = EnvHandler
            .execute(&CancelToken::new(), &params, &Variables::new())
            .unwrap_err();
        assert!(err.to_string().contains("'value' parameter required"));
    }

    #[test]
    fn process_scope_sets_and_removes() {
        let set: Params =
            serde_yaml::from_str("name: DROVER_ENV_T2\nvalue: v1\nscope: process").unwrap();
        let out = EnvHandler
            .execute(&CancelToken::new(), &set, &Variables::new())
            .unwrap();
        assert!(out.changed);
        assert_eq!(std::env::var("DROVER_ENV_T2").unwrap(), "v1");

        // Same value again is a no-op.
        let out = EnvHandler
            .execute(&CancelToken::new(), &set, &Variables::new())
            .unwrap();
        assert!(!out.changed);

        let unset: Params =
            serde_yaml::from_str("name: DROVER_ENV_T2\nstate: absent\nscope: process").unwrap();
        let out = EnvHandler
            .execute(&CancelToken::new(), &unset, &Variables::new())
            .unwrap();
        assert!(out.changed);
        assert!(std::env::var("DROVER_ENV_T2").is_err());
        // Already absent.
        let out = EnvHandler
            .execute(&CancelToken::new(), &unset, &Variables::new())
            .unwrap();
        assert!(!out.changed);
    }

    #[test]
    fn profile_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bashrc");
        fs::write(&profile, "# comment\nexport OTHER=\"1\"\n").unwrap();

        assert!(upsert_profile(&profile, "DROVER_HOME", "/opt/drover").unwrap());
        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.contains("export DROVER_HOME=\"/opt/drover\""));
        assert!(content.contains("export OTHER=\"1\""));

        // Unchanged value: no write.
        assert!(!upsert_profile(&profile, "DROVER_HOME", "/opt/drover").unwrap());

        // New value replaces the line rather than appending a second one.
        assert!(upsert_profile(&profile, "DROVER_HOME", "/srv/drover").unwrap());
        let content = fs::read_to_string(&profile).unwrap();
        assert_eq!(content.matches("export DROVER_HOME=").count(), 1);
        assert!(content.contains("/srv/drover"));
    }

    #[test]
    fn profile_remove_drops_only_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bashrc");
        fs::write(
            &profile,
            "export KEEP=\"a\"\nexport DROP=\"b\"\n",
        )
        .unwrap();

        assert!(remove_from_profile(&profile, "DROP").unwrap());
        let content = fs::read_to_string(&profile).unwrap();
        assert!(content.contains("KEEP"));
        assert!(!content.contains("DROP"));

        assert!(!remove_from_profile(&profile, "DROP").unwrap());
        assert!(!remove_from_profile(&dir.path().join("missing"), "X").unwrap());
    }
}
