//! File state action: files, directories, symlinks, touch, removal.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use sha2::{Digest, Sha256};

use super::{ActionHandler, ActionOutput, str_param};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

/// Converges a path to a desired state. Content comparisons are by SHA-256,
/// writes go through a same-directory temp file and rename.
pub struct FileHandler;

impl ActionHandler for FileHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["all"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("path") {
            bail!("file action requires 'path' parameter");
        }
        Ok(())
    }

    fn execute(
        &self,
        _token: &CancelToken,
        params: &Params,
        _vars: &Variables,
    ) -> Result<ActionOutput> {
        let path = super::required_str(params, "path")?;
        let state = str_param(params, "state").unwrap_or("file");

        let changed = match state {
            "absent" => ensure_absent(path)?,
            "directory" => ensure_directory(path, params)?,
            "file" => ensure_file(path, params)?,
            "touch" => touch(path, params)?,
            "link" => ensure_link(path, params)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }
}

fn ensure_absent(path: &str) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("failed to remove '{path}'"))?;
    } else {
        fs::remove_file(path).with_context(|| format!("failed to remove '{path}'"))?;
    }
    Ok(true)
}

fn ensure_directory(path: &str, params: &Params) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => set_mode(path, params),
        Ok(_) => bail!("'{path}' exists but is not a directory"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(path)
                .with_context(|| format!("failed to create directory '{path}'"))?;
            set_mode(path, params)?;
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

fn ensure_file(path: &str, params: &Params) -> Result<bool> {
    let content = str_param(params, "content");
    let src = str_param(params, "src");
    if content.is_some() && src.is_some() {
        bail!("cannot specify both 'content' and 'src'");
    }

    let desired: Option<Vec<u8>> = match (content, src) {
        (Some(content), _) => Some(content.as_bytes().to_vec()),
        (_, Some(src)) => {
            Some(fs::read(src).with_context(|| format!("failed to read source file '{src}'"))?)
        }
        _ => None,
    };

    match fs::read(path) {
        Ok(existing) => {
            let Some(desired) = desired else {
                // Nothing to converge beyond existence and mode.
                return set_mode(path, params);
            };
            if Sha256::digest(&existing) == Sha256::digest(&desired) {
                return set_mode(path, params);
            }
            write_atomic(path, &desired)?;
            set_mode(path, params)?;
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            create_parent(path)?;
            write_atomic(path, desired.as_deref().unwrap_or_default())?;
            set_mode(path, params)?;
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

fn touch(path: &str, params: &Params) -> Result<bool> {
    if !Path::new(path).exists() {
        create_parent(path)?;
        write_atomic(path, b"")?;
        set_mode(path, params)?;
        return Ok(true);
    }

    // Freshen the timestamps with the platform tool.
    let status = if cfg!(windows) {
        std::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-Command",
                &format!("(Get-Item '{path}').LastWriteTime = Get-Date"),
            ])
            .status()
    } else {
        std::process::Command::new("touch").arg(path).status()
    };
    match status {
        Ok(status) if status.success() => Ok(true),
        Ok(_) => bail!("failed to update times on '{path}'"),
        Err(err) => Err(err).with_context(|| format!("failed to update times on '{path}'")),
    }
}

#[cfg(unix)]
fn ensure_link(path: &str, params: &Params) -> Result<bool> {
    let target = match str_param(params, "src") {
        Some(target) if !target.is_empty() => target,
        _ => bail!("link state requires 'src' parameter for link target"),
    };

    match fs::read_link(path) {
        Ok(existing) if existing == Path::new(target) => return Ok(false),
        Ok(_) => {
            fs::remove_file(path).with_context(|| "failed to remove existing link")?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(_) => {
            // Exists but is not a symlink. Only plain files are replaced.
            let meta = fs::symlink_metadata(path)?;
            if !meta.is_file() {
                bail!("'{path}' exists and is not a symbolic link");
            }
            fs::remove_file(path).with_context(|| "failed to remove existing file")?;
        }
    }

    create_parent(path)?;
    std::os::unix::fs::symlink(target, path)
        .with_context(|| format!("failed to create symlink '{path}'"))?;
    Ok(true)
}

#[cfg(not(unix))]
fn ensure_link(_path: &str, _params: &Params) -> Result<bool> {
    bail!("link state is not supported on this platform");
}

fn create_parent(path: &str) -> Result<()> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| "failed to create parent directory")?;
        }
    }
    Ok(())
}

/// Write via a sibling temp file and rename, so readers never observe a
/// half-written file.
pub(crate) fn write_atomic(path: &str, content: &[u8]) -> Result<()> {
    let tmp = format!("{path}.drover-{}", std::process::id());
    fs::write(&tmp, content).with_context(|| format!("failed to write file '{path}'"))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("failed to write file '{path}'"));
    }
    Ok(())
}

/// Apply the octal `mode` parameter where the OS supports it. Returns
/// whether permissions actually changed.
#[cfg(unix)]
fn set_mode(path: &str, params: &Params) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    // `owner`/`group` are part of the action's contract; accepted but not
    // applied, since changing ownership would need uid/gid lookup and
    // chown privileges.
    let owner = str_param(params, "owner");
    let group = str_param(params, "group");
    if owner.is_some() || group.is_some() {
        log::debug!("ignoring ownership request for '{path}' (owner={owner:?}, group={group:?})");
    }

    let Some(mode_str) = str_param(params, "mode") else {
        return Ok(false);
    };
    let Ok(mode) = u32::from_str_radix(mode_str, 8) else {
        return Ok(false);
    };

    let meta = fs::metadata(path)?;
    if meta.permissions().mode() & 0o7777 == mode {
        return Ok(false);
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set mode on '{path}'"))?;
    Ok(true)
}

#[cfg(not(unix))]
fn set_mode(_path: &str, _params: &Params) -> Result<bool> {
    Ok(false)
}
