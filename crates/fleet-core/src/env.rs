use crate::error::Result;
use crate::io;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use tracing::warn;

/// A line of the environment file that produced no variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvWarning {
    /// 1-based line number.
    pub line: usize,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    pub vars: BTreeMap<String, String>,
    /// Non-comment lines with no `=`.
    pub warnings: Vec<EnvWarning>,
    /// Lines with an `=` that dotenvy still refuses, e.g. `=x`.
    pub rejected: Vec<EnvWarning>,
}

/// Parse the environment file one line at a time. Blank lines and `#`
/// comments are skipped and later keys win. Values go through dotenvy, so
/// quoting, `export` prefixes and `$VAR` expansion follow the usual `.env`
/// rules. Expansion sees the process environment only.
pub fn parse(content: &str) -> EnvFile {
    let mut out = EnvFile::default();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = EnvWarning {
            line: idx + 1,
            content: raw.to_string(),
        };
        if !line.contains('=') {
            out.warnings.push(entry);
            continue;
        }
        match dotenvy::from_read_iter(line.as_bytes()).next() {
            Some(Ok((key, value))) => {
                out.vars.insert(key, value);
            }
            Some(Err(_)) | None => out.rejected.push(entry),
        }
    }
    out
}

/// Load `.env` from the fleet root. A missing file is empty.
pub fn load(root: &Path) -> Result<EnvFile> {
    let path = crate::paths::env_path(root);
    let content = io::read_if_exists(&path)
        .map_err(|e| e.at("read environment file", &path))?
        .unwrap_or_default();
    let parsed = parse(&content);
    for w in &parsed.warnings {
        warn!(path = %path.display(), line = w.line, "environment line has no '=': {}", w.content);
    }
    for w in &parsed.rejected {
        warn!(path = %path.display(), line = w.line, "environment line ignored: {}", w.content);
    }
    Ok(parsed)
}

/// The current process environment overlaid with `file`. Keys and values
/// that are not valid UTF-8 are passed through untouched.
pub fn merged_environment(file: &EnvFile) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    env.extend(
        file.vars
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v))),
    );
    env
}
