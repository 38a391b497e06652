//! Windows registry action.
//!
//! Reads current values through `reg query`, compares by type, and writes
//! with `reg add` only on drift. On other platforms the handler is present
//! but refuses to run; the parser already rejects registry tasks that could
//! reach a non-Windows host.

use anyhow::{Result, bail};

use super::{ActionHandler, ActionOutput};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

pub struct RegistryHandler;

impl ActionHandler for RegistryHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["windows"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("path") {
            bail!("registry action requires 'path' parameter");
        }
        if let Some(path) = super::str_param(params, "path") {
            // Reject unknown hives before anything touches the host.
            if !path.contains("{{") {
                normalize_path(path)?;
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    fn execute(
        &self,
        _token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        imp::execute(params)
    }

    #[cfg(not(windows))]
    fn execute(
        &self,
        _token: &CancelToken,
        _params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        bail!("registry action is only available on Windows")
    }
}

/// Normalize a playbook registry path to the short root form reg.exe wants.
/// Accepted roots: HKLM, HKCU, HKCR, HKU, HKCC and their long names.
fn normalize_path(path: &str) -> Result<String> {
    let Some((root, subkey)) = path.split_once('\\') else {
        bail!("invalid registry path: {path}");
    };
    let root = match root.to_uppercase().as_str() {
        "HKEY_LOCAL_MACHINE" | "HKLM" => "HKLM",
        "HKEY_CURRENT_USER" | "HKCU" => "HKCU",
        "HKEY_CLASSES_ROOT" | "HKCR" => "HKCR",
        "HKEY_USERS" | "HKU" => "HKU",
        "HKEY_CURRENT_CONFIG" | "HKCC" => "HKCC",
        other => bail!("unknown registry root: {other}"),
    };
    Ok(format!("{root}\\{subkey}"))
}

#[cfg(windows)]
mod imp {
    use std::process::Command;

    use anyhow::{Context as _, Result, bail};

    use super::super::{ActionOutput, str_param, value_to_string};
    use super::normalize_path;
    use crate::types::Params;

    pub fn execute(params: &Params) -> Result<ActionOutput> {
        let path = super::super::required_str(params, "path")?;
        let path = normalize_path(path)?;
        let state = str_param(params, "state").unwrap_or("present");

        let changed = match state {
            "present" => ensure_present(&path, params)?,
            "absent" => ensure_absent(&path, params)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }

    fn ensure_present(path: &str, params: &Params) -> Result<bool> {
        let mut changed = false;

        if !key_exists(path)? {
            reg(&["add", path, "/f"])?;
            changed = true;
        }

        let Some(name) = str_param(params, "name") else {
            return Ok(changed);
        };
        let Some(value) = params.get("value") else {
            bail!("'value' parameter required when 'name' is specified");
        };

        let value_type = str_param(params, "type").unwrap_or("string").to_lowercase();
        let (reg_type, desired) = encode_value(&value_type, value)?;

        if let Some((current_type, current)) = query_value(path, name)? {
            if current_type == reg_type && values_equal(reg_type, &current, &desired) {
                return Ok(changed);
            }
        }

        let mut args = vec!["add", path, "/v", name, "/t", reg_type];
        if reg_type == "REG_MULTI_SZ" {
            args.extend(["/s", "\\0"]);
        }
        args.extend(["/d", desired.as_str(), "/f"]);
        reg(&args)?;
        Ok(true)
    }

    fn ensure_absent(path: &str, params: &Params) -> Result<bool> {
        if let Some(name) = str_param(params, "name") {
            if query_value(path, name)?.is_none() {
                return Ok(false);
            }
            reg(&["delete", path, "/v", name, "/f"])?;
            return Ok(true);
        }

        if !key_exists(path)? {
            return Ok(false);
        }
        reg(&["delete", path, "/f"])?;
        Ok(true)
    }

    /// Map the playbook type tag to a reg.exe type and render the desired
    /// data in reg.exe's `/d` syntax.
    fn encode_value(value_type: &str, value: &serde_yaml::Value) -> Result<(&'static str, String)> {
        Ok(match value_type {
            "string" | "sz" => ("REG_SZ", value_to_string(value)),
            "expandstring" | "expand_sz" => ("REG_EXPAND_SZ", value_to_string(value)),
            "dword" | "integer" => ("REG_DWORD", parse_int(value, 32)?.to_string()),
            "qword" => ("REG_QWORD", parse_int(value, 64)?.to_string()),
            "multistring" | "multi_sz" => {
                let parts: Vec<String> = match value {
                    serde_yaml::Value::Sequence(items) => {
                        items.iter().map(value_to_string).collect()
                    }
                    serde_yaml::Value::String(s) => s.split('\n').map(String::from).collect(),
                    other => bail!("invalid multi-string value: {other:?}"),
                };
                ("REG_MULTI_SZ", parts.join("\\0"))
            }
            "binary" => ("REG_BINARY", value_to_string(value)),
            other => bail!("unknown registry value type: {other}"),
        })
    }

    fn parse_int(value: &serde_yaml::Value, bits: u32) -> Result<u64> {
        let parsed = match value {
            serde_yaml::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_i64().map(|i| i as u64))
                .context("invalid integer value")?,
            serde_yaml::Value::String(s) => {
                let s = s.trim();
                if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16).context("invalid integer value")?
                } else {
                    s.parse().context("invalid integer value")?
                }
            }
            other => bail!("invalid integer value type: {other:?}"),
        };
        if bits == 32 && parsed > u32::MAX as u64 {
            bail!("value does not fit in a DWORD");
        }
        Ok(parsed)
    }

    fn values_equal(reg_type: &str, current: &str, desired: &str) -> bool {
        match reg_type {
            // reg query prints integers as 0x-prefixed hex.
            "REG_DWORD" | "REG_QWORD" => {
                let current = current
                    .trim()
                    .strip_prefix("0x")
                    .and_then(|h| u64::from_str_radix(h, 16).ok());
                let desired = desired.trim().parse::<u64>().ok();
                current.is_some() && current == desired
            }
            _ => current == desired,
        }
    }

    fn key_exists(path: &str) -> Result<bool> {
        let output = Command::new("reg")
            .args(["query", path, "/ve"])
            .output()
            .context("failed to execute reg")?;
        Ok(output.status.success())
    }

    /// Read one named value: returns `(type, data)` or None when missing.
    fn query_value(path: &str, name: &str) -> Result<Option<(String, String)>> {
        let output = Command::new("reg")
            .args(["query", path, "/v", name])
            .output()
            .context("failed to execute reg")?;
        if !output.status.success() {
            return Ok(None);
        }

        // Output shape:
        //   HKEY_LOCAL_MACHINE\...
        //       name    REG_SZ    data
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            let mut fields = line.trim().splitn(3, "    ");
            let (Some(field_name), Some(field_type)) = (fields.next(), fields.next()) else {
                continue;
            };
            if field_name == name && field_type.starts_with("REG_") {
                return Ok(Some((
                    field_type.trim().to_string(),
                    fields.next().unwrap_or("").trim().to_string(),
                )));
            }
        }
        Ok(None)
    }

    fn reg(args: &[&str]) -> Result<()> {
        let output = Command::new("reg")
            .args(args)
            .output()
            .context("failed to execute reg")?;
        if !output.status.success() {
            bail!(
                "reg {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
