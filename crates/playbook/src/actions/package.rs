//! Android package action.
//!
//! Converges installed packages through `pm`: install from a supplied APK
//! path, uninstall by package name.

use anyhow::{Result, bail};

use super::{ActionHandler, ActionOutput};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

pub struct PackageHandler;

impl ActionHandler for PackageHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["android"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("name") {
            bail!("package action requires 'name' parameter");
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
        bail!("package action is only available on Android")
    }
}

#[cfg(target_os = "android")]
mod imp {
    use std::process::Command;

    use anyhow::{Context as _, Result, bail};

    use super::super::{ActionOutput, str_param};
    use crate::types::Params;

    pub fn execute(params: &Params) -> Result<ActionOutput> {
        let name = super::super::required_str(params, "name")?;
        let state = str_param(params, "state").unwrap_or("present");

        let changed = match state {
            "present" => {
                if is_installed(name)? {
                    false
                } else {
                    let Some(apk) = str_param(params, "src") else {
                        bail!("'src' parameter (APK path) required to install '{name}'");
                    };
                    run_pm(&["install", "-r", apk])?;
                    true
                }
            }
            "absent" => {
                if !is_installed(name)? {
                    false
                } else {
                    run_pm(&["uninstall", name])?;
                    true
                }
            }
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }

    fn is_installed(name: &str) -> Result<bool> {
        let output = Command::new("pm")
            .args(["list", "packages", name])
            .output()
            .context("failed to execute pm")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|l| l.trim() == format!("package:{name}")))
    }

    fn run_pm(args: &[&str]) -> Result<()> {
        let output = Command::new("pm")
            .args(args)
            .output()
            .context("failed to execute pm")?;
        if !output.status.success() {
            bail!(
                "pm {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_name() {
        let ok: Params = serde_yaml::from_str("name: com.example.app").unwrap();
        assert!(PackageHandler.validate(&ok).is_ok());

        let missing: Params = serde_yaml::from_str("state: present").unwrap();
        assert!(PackageHandler.validate(&missing).is_err());
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn refuses_off_android() {
        let params: Params = serde_yaml::from_str("name: com.example.app").unwrap();
        let err = PackageHandler
            .execute(&CancelToken::new(), &params, &Variables::new())
            .unwrap_err();
        assert!(err.to_string().contains("only available on Android"));
    }
}
