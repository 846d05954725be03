//! Dotenv file updates
//!
//! Rewrites `KEY=value` lines in place, appends keys that are missing and
//! leaves comments, blank lines and unrelated keys alone. A file that does
//! not exist is never created.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Apply `pairs`; returns false when the file does not exist
    pub fn update(&self, pairs: &[(String, String)]) -> Result<bool> {
        if !self.exists() {
            debug!(path = %self.path.display(), "Env file not found, skipping update");
            return Ok(false);
        }

        let contents = fs::read_to_string(&self.path)?;
        let mut pending: Vec<&(String, String)> = pairs.iter().collect();
        let mut lines: Vec<String> = Vec::new();

        for line in contents.lines() {
            let replaced = line_key(line).and_then(|key| {
                pending
                    .iter()
                    .position(|(k, _)| k == key)
                    .map(|idx| pending.remove(idx))
            });
            match replaced {
                Some((key, value)) => lines.push(format_line(key, value)),
                None => lines.push(line.to_string()),
            }
        }

        for (key, value) in pending {
            lines.push(format_line(key, value));
        }

        let mut output = lines.join("\n");
        output.push('\n');
        fs::write(&self.path, output)?;

        info!(
            path = %self.path.display(),
            keys = pairs.len(),
            "Updated env file"
        );
        Ok(true)
    }

    /// Set every key in `keys` to an empty value
    pub fn blank(&self, keys: &[&str]) -> Result<bool> {
        let pairs: Vec<(String, String)> = keys
            .iter()
            .map(|k| (k.to_string(), String::new()))
            .collect();
        self.update(&pairs)
    }
}

/// Key of an assignment line, ignoring comments and an `export ` prefix
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

/// Single quotes are read literally; values containing one fall back to
/// double quotes with `\\`, `"`, `$` and newlines escaped
fn format_line(key: &str, value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$'));
    if !needs_quotes {
        return format!("{}={}", key, value);
    }
    if !value.contains('\'') && !value.contains('\n') {
        return format!("{}='{}'", key, value);
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    format!("{}=\"{}\"", key, escaped)
}
