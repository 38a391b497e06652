//! Android settings action.
//!
//! Drives the `settings` tool over the system/secure/global namespaces.
//! Present on every build so validation and dry runs behave uniformly, but
//! it only executes on Android.

use anyhow::{Result, bail};

use super::{ActionHandler, ActionOutput};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

pub struct SettingsHandler;

impl ActionHandler for SettingsHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["android"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("namespace") {
            bail!("settings action requires 'namespace' parameter");
        }
        if !params.contains_key("key") {
            bail!("settings action requires 'key' parameter");
        }
        Ok(())
    }

    #[cfg(target_os = "android")]
    fn execute(
        &self,
        _token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        imp::execute(params)
    }

    #[cfg(not(target_os = "android"))]
    fn execute(
        &self,
        _token: &CancelToken,
        _params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        bail!("settings action is only available on Android")
    }
}

#[cfg(target_os = "android")]
mod imp {
    use std::process::Command;

    use anyhow::{Context as _, Result, bail};

    use super::super::{ActionOutput, str_param, value_to_string};
    use crate::types::Params;

    pub fn execute(params: &Params) -> Result<ActionOutput> {
        let namespace = super::super::required_str(params, "namespace")?;
        if !matches!(namespace, "system" | "secure" | "global") {
            bail!("unknown settings namespace '{namespace}'");
        }
        let key = super::super::required_str(params, "key")?;
        let state = str_param(params, "state").unwrap_or("present");

        let changed = match state {
            "present" => {
                let value = params
                    .get("value")
                    .map(value_to_string)
                    .ok_or_else(|| {
                        anyhow::anyhow!("'value' parameter required for state 'present'")
                    })?;
                ensure_present(namespace, key, &value)?
            }
            "absent" => ensure_absent(namespace, key)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }

    fn ensure_present(namespace: &str, key: &str, value: &str) -> Result<bool> {
        if current_value(namespace, key).as_deref() == Some(value) {
            return Ok(false);
        }
        run_settings(&["put", namespace, key, value])?;
        Ok(true)
    }

    fn ensure_absent(namespace: &str, key: &str) -> Result<bool> {
        if current_value(namespace, key).is_none() {
            return Ok(false);
        }
        run_settings(&["delete", namespace, key])?;
        Ok(true)
    }

    fn current_value(namespace: &str, key: &str) -> Option<String> {
        let output = Command::new("settings")
            .args(["get", namespace, key])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // `settings get` prints the literal string "null" for unset keys.
        (value != "null").then_some(value)
    }

    fn run_settings(args: &[&str]) -> Result<()> {
        let output = Command::new("settings")
            .args(args)
            .output()
            .context("failed to execute settings")?;
        if !output.status.success() {
            bail!(
                "settings {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
