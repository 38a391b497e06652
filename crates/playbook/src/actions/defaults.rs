//! macOS defaults action.
//!
//! Converges entries in the defaults database: read the current value and
//! type with `defaults read` / `defaults read-type`, compare with type-aware
//! equality, and only then write.

use anyhow::{Result, bail};

use super::{ActionHandler, ActionOutput};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

pub struct DefaultsHandler;

impl ActionHandler for DefaultsHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["darwin"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("domain") {
            bail!("defaults action requires 'domain' parameter");
        }
        if !params.contains_key("key") {
            bail!("defaults action requires 'key' parameter");
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn execute(
        &self,
        _token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        imp::execute(params)
    }

    #[cfg(not(target_os = "macos"))]
    fn execute(
        &self,
        _token: &CancelToken,
        _params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        bail!("defaults action is only available on macOS")
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use std::process::Command;

    use anyhow::{Context as _, Result, bail};

    use super::super::{ActionOutput, str_param, value_to_string};
    use crate::types::Params;

    pub fn execute(params: &Params) -> Result<ActionOutput> {
        let domain = super::super::required_str(params, "domain")?;
        let key = super::super::required_str(params, "key")?;
        let state = str_param(params, "state").unwrap_or("present");

        let changed = match state {
            "present" => {
                let Some(value) = params.get("value") else {
                    bail!("'value' parameter required for state 'present'");
                };
                ensure_present(domain, key, value, params)?
            }
            "absent" => ensure_absent(domain, key)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }

    fn ensure_present(
        domain: &str,
        key: &str,
        value: &serde_yaml::Value,
        params: &Params,
    ) -> Result<bool> {
        if let Some((current, current_type)) = read_current(domain, key) {
            if values_equal(&current, &current_type, value) {
                return Ok(false);
            }
        }

        let value_type = match str_param(params, "type") {
            Some(t) => t.to_string(),
            None => detect_type(value).to_string(),
        };
        let host = str_param(params, "host");

        let mut args: Vec<String> = vec!["write".into()];
        if let Some(host) = host {
            args.push("-host".into());
            args.push(host.to_string());
        }
        args.push(domain.to_string());
        args.push(key.to_string());
        append_typed_value(&mut args, &value_type, value)?;

        let output = Command::new("defaults")
            .args(&args)
            .output()
            .context("failed to execute defaults write")?;
        if !output.status.success() {
            bail!(
                "defaults write failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(true)
    }

    fn ensure_absent(domain: &str, key: &str) -> Result<bool> {
        if read_current(domain, key).is_none() {
            return Ok(false);
        }
        let output = Command::new("defaults")
            .args(["delete", domain, key])
            .output()
            .context("failed to execute defaults delete")?;
        if !output.status.success() {
            bail!(
                "defaults delete failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(true)
    }

    /// Current value and type, or None when the key is missing.
    fn read_current(domain: &str, key: &str) -> Option<(String, String)> {
        let output = Command::new("defaults")
            .args(["read", domain, key])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let type_output = Command::new("defaults")
            .args(["read-type", domain, key])
            .output()
            .ok();
        let value_type = type_output
            .filter(|o| o.status.success())
            .map(|o| {
                String::from_utf8_lossy(&o.stdout)
                    .trim()
                    .strip_prefix("Type is ")
                    .unwrap_or("string")
                    .to_string()
            })
            .unwrap_or_else(|| "string".to_string());

        Some((value, value_type))
    }

    fn append_typed_value(
        args: &mut Vec<String>,
        value_type: &str,
        value: &serde_yaml::Value,
    ) -> Result<()> {
        match value_type {
            "string" => {
                args.push("-string".into());
                args.push(value_to_string(value));
            }
            "int" | "integer" => {
                args.push("-int".into());
                args.push(value_to_string(value));
            }
            "float" => {
                args.push("-float".into());
                args.push(value_to_string(value));
            }
            "bool" | "boolean" => {
                args.push("-bool".into());
                args.push(coerce_bool(value).to_string());
            }
            "data" => {
                args.push("-data".into());
                args.push(value_to_string(value));
            }
            "date" => {
                args.push("-date".into());
                args.push(value_to_string(value));
            }
            "array" => {
                args.push("-array".into());
                match value {
                    serde_yaml::Value::Sequence(items) => {
                        args.extend(items.iter().map(value_to_string));
                    }
                    other => args.push(value_to_string(other)),
                }
            }
            "array-add" => {
                args.push("-array-add".into());
                args.push(value_to_string(value));
            }
            "dict" => {
                args.push("-dict".into());
                if let serde_yaml::Value::Mapping(map) = value {
                    for (k, v) in map {
                        args.push(value_to_string(k));
                        args.push(value_to_string(v));
                    }
                }
            }
            other => bail!("unknown defaults type: {other}"),
        }
        Ok(())
    }

    /// Auto-detect the defaults type when the playbook does not name one.
    fn detect_type(value: &serde_yaml::Value) -> &'static str {
        match value {
            serde_yaml::Value::Bool(_) => "bool",
            serde_yaml::Value::Number(n) if n.is_i64() || n.is_u64() => "int",
            serde_yaml::Value::Number(_) => "float",
            serde_yaml::Value::Sequence(_) => "array",
            serde_yaml::Value::Mapping(_) => "dict",
            _ => "string",
        }
    }

    fn coerce_bool(value: &serde_yaml::Value) -> bool {
        match value {
            serde_yaml::Value::Bool(b) => *b,
            serde_yaml::Value::String(s) => {
                matches!(s.to_lowercase().as_str(), "true" | "1" | "yes")
            }
            serde_yaml::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    /// Type-aware comparison of the observed value against the desired one.
    fn values_equal(current: &str, current_type: &str, desired: &serde_yaml::Value) -> bool {
        match current_type {
            "integer" => {
                let Ok(current) = current.parse::<i64>() else {
                    return false;
                };
                match desired {
                    serde_yaml::Value::Number(n) => n.as_i64() == Some(current),
                    serde_yaml::Value::String(s) => s.parse::<i64>().ok() == Some(current),
                    _ => false,
                }
            }
            "float" => {
                let Ok(current) = current.parse::<f64>() else {
                    return false;
                };
                match desired {
                    serde_yaml::Value::Number(n) => n.as_f64() == Some(current),
                    serde_yaml::Value::String(s) => s.parse::<f64>().ok() == Some(current),
                    _ => false,
                }
            }
            "boolean" => {
                let current = current == "1" || current.eq_ignore_ascii_case("true");
                current == coerce_bool(desired)
            }
            _ => current == value_to_string(desired),
        }
    }
}
