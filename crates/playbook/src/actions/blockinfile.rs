//! Marker-delimited block edits.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use regex::Regex;

use super::file::write_atomic;
use super::{ActionHandler, ActionOutput, bool_param, str_param};
use crate::cancel::CancelToken;
use crate::types::Params;
use crate::vars::Variables;

/// Default marker template; `{mark}` becomes BEGIN / END.
const DEFAULT_MARKER: &str = "# {mark} MANAGED BLOCK";

/// Maintains a block of lines between BEGIN/END markers. When the markers
/// already exist the enclosed content is replaced; otherwise the block is
/// inserted per the insertafter/insertbefore directives, else appended.
pub struct BlockinfileHandler;

impl ActionHandler for BlockinfileHandler {
    fn supports(&self) -> &'static [&'static str] {
        &["all"]
    }

    fn validate(&self, params: &Params) -> Result<()> {
        if !params.contains_key("path") {
            bail!("blockinfile action requires 'path' parameter");
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

        let marker = str_param(params, "marker").unwrap_or(DEFAULT_MARKER);
        let begin_marker = marker.replacen("{mark}", "BEGIN", 1);
        let end_marker = marker.replacen("{mark}", "END", 1);

        let changed = match state {
            "present" => {
                let block = str_param(params, "block").unwrap_or("");
                ensure_present(path, block, &begin_marker, &end_marker, params)?
            }
            "absent" => ensure_absent(path, &begin_marker, &end_marker)?,
            other => bail!("unknown state '{other}'"),
        };

        Ok(if changed {
            ActionOutput::changed()
        } else {
            ActionOutput::unchanged()
        })
    }
}

fn ensure_present(
    path: &str,
    block: &str,
    begin_marker: &str,
    end_marker: &str,
    params: &Params,
) -> Result<bool> {
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

    let lines: Vec<&str> = content.split('\n').collect();
    let span = find_block(&lines, begin_marker, end_marker);

    let mut new_block: Vec<String> = vec![begin_marker.to_string()];
    if !block.is_empty() {
        new_block.extend(block.split('\n').map(String::from));
    }
    new_block.push(end_marker.to_string());

    let new_lines: Vec<String> = match span {
        Some((begin, end)) => {
            if lines[begin..=end] == new_block[..] {
                return Ok(false);
            }
            let mut out: Vec<String> = lines[..begin].iter().map(|s| s.to_string()).collect();
            out.extend(new_block);
            out.extend(lines[end + 1..].iter().map(|s| s.to_string()));
            out
        }
        None => insert_block(&lines, new_block, params),
    };

    write_atomic(path, new_lines.join("\n").as_bytes())?;
    Ok(true)
}

fn ensure_absent(path: &str, begin_marker: &str, end_marker: &str) -> Result<bool> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    let lines: Vec<&str> = content.split('\n').collect();
    let Some((begin, end)) = find_block(&lines, begin_marker, end_marker) else {
        return Ok(false);
    };

    let mut kept: Vec<&str> = lines[..begin].to_vec();
    kept.extend(&lines[end + 1..]);
    write_atomic(path, kept.join("\n").as_bytes())?;
    Ok(true)
}

/// Locate the managed block. Marker comparison ignores surrounding
/// whitespace; a begin without a following end is treated as no block.
fn find_block(lines: &[&str], begin_marker: &str, end_marker: &str) -> Option<(usize, usize)> {
    let mut begin = None;
    let mut end = None;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed == begin_marker.trim() {
            begin = Some(i);
        } else if trimmed == end_marker.trim() {
            end = Some(i);
        }
    }
    match (begin, end) {
        (Some(b), Some(e)) if e > b => Some((b, e)),
        _ => None,
    }
}

fn owned<'a>(slice: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    slice.iter().map(|s| s.to_string())
}

fn insert_block(lines: &[&str], block: Vec<String>, params: &Params) -> Vec<String> {

    if let Some(anchor) = str_param(params, "insertafter") {
        if anchor == "EOF" {
            let mut out: Vec<String> = owned(lines).collect();
            out.extend(block);
            return out;
        }
        if let Ok(regex) = Regex::new(anchor) {
            if let Some(i) = lines.iter().position(|l| regex.is_match(l)) {
                let mut out: Vec<String> = owned(&lines[..=i]).collect();
                out.extend(block);
                out.extend(owned(&lines[i + 1..]));
                return out;
            }
        }
    }

    if let Some(anchor) = str_param(params, "insertbefore") {
        if anchor == "BOF" {
            let mut out = block;
            out.extend(owned(lines));
            return out;
        }
        if let Ok(regex) = Regex::new(anchor) {
            if let Some(i) = lines.iter().position(|l| regex.is_match(l)) {
                let mut out: Vec<String> = owned(&lines[..i]).collect();
                out.extend(block);
                out.extend(owned(&lines[i..]));
                return out;
            }
        }
    }

    let mut out: Vec<String> = owned(lines).collect();
    out.extend(block);
    out
}
