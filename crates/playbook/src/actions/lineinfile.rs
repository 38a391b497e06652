//! Line-level file edits.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use regex::Regex;

use super::file::write_atomic;
use super::{ActionHandler, ActionOutput, bool_param, str_param};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

/// Ensures a single line is present (optionally replacing a regexp match)
/// or that matching lines are absent.
pub struct LineinfileHandler;

impl ActionHandler for LineinfileHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["all"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("path") {
            bail!("lineinfile action requires 'path' parameter");
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
        let state = str_param(params, "state").unwrap_or("present");

        let changed = match state {
            "present" => ensure_present(path, params)?,
            "absent" => ensure_absent(path, params)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }
}

fn ensure_present(path: &str, params: &Params) -> Result<bool> {
    let line = str_param(params, "line");
    let regexp = str_param(params, "regexp");
    if line.is_none() && regexp.is_none() {
        bail!("'line' or 'regexp' parameter is required for state 'present'");
    }

    let create = bool_param(params, "create", true);
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if !create {
                bail!("file '{path}' does not exist and create=false");
            }
            if let Some(dir) = Path::new(path).parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir).with_context(|| "failed to create directory")?;
                }
            }
            String::new()
        }
        Err(err) => return Err(err.into()),
    };

    let mut lines: Vec<String> = content.split('\n').map(String::from).collect();
    let mut changed = false;

    let insert_after = str_param(params, "insertafter");
    let insert_before = str_param(params, "insertbefore");

    if let Some(regexp) = regexp {
        let regex = Regex::new(regexp).with_context(|| "invalid regexp")?;

        // Replace the first matching line; insert only when nothing matched.
        let matched = lines.iter().position(|l| regex.is_match(l));
        match (matched, line) {
            (Some(i), Some(line)) => {
                if lines[i] != line {
                    lines[i] = line.to_string();
                    changed = true;
                }
            }
            (Some(_), None) => {}
            (None, Some(line)) => {
                changed = insert_line(&mut lines, line, insert_after, insert_before);
            }
            (None, None) => {}
        }
    } else if let Some(line) = line {
        if !lines.iter().any(|l| l == line) {
            changed = insert_line(&mut lines, line, insert_after, insert_before);
        }
    }

    if changed {
        write_atomic(path, lines.join("\n").as_bytes())?;
    }
    Ok(changed)
}

fn ensure_absent(path: &str, params: &Params) -> Result<bool> {
    let line = str_param(params, "line");
    let regexp = str_param(params, "regexp");
    if line.is_none() && regexp.is_none() {
        bail!("'line' or 'regexp' parameter is required for state 'absent'");
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    let regex = regexp
        .map(Regex::new)
        .transpose()
        .with_context(|| "invalid regexp")?;

    let mut removed = false;
    let kept: Vec<&str> = content
        .split('\n')
        .filter(|l| {
            let matches = regex.as_ref().map(|r| r.is_match(l)).unwrap_or(false)
                || line.is_some_and(|wanted| *l == wanted);
            if matches {
                removed = true;
            }
            !matches
        })
        .collect();

    if removed {
        write_atomic(path, kept.join("\n").as_bytes())?;
    }
    Ok(removed)
}

/// Insert a line per the insertafter/insertbefore directives, defaulting to
/// append. `EOF` and `BOF` are positional sentinels; anything else is a
/// regex anchor.
fn insert_line(
    lines: &mut Vec<String>,
    line: &str,
    insert_after: Option<&str>,
    insert_before: Option<&str>,
) -> bool {
    if let Some(anchor) = insert_after {
        if anchor == "EOF" {
            lines.push(line.to_string());
            return true;
        }
        if let Ok(regex) = Regex::new(anchor) {
            if let Some(i) = lines.iter().position(|l| regex.is_match(l)) {
                lines.insert(i + 1, line.to_string());
                return true;
            }
        }
    }

    if let Some(anchor) = insert_before {
        if anchor == "BOF" {
            lines.insert(0, line.to_string());
            return true;
        }
        if let Ok(regex) = Regex::new(anchor) {
            if let Some(i) = lines.iter().position(|l| regex.is_match(l)) {
                lines.insert(i, line.to_string());
                return true;
            }
        }
    }

    lines.push(line.to_string());
    true
}
