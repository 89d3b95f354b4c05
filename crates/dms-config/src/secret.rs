//! Secret acquisition, done exactly once before the engine starts.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use dms_engine::{Secret, SwitchError};

/// A line consisting of exactly this ends interactive input.
pub const SECRET_SENTINEL: &str = "EOF";

/// Read lines until the sentinel line (or end of input) and join them with
/// `\n`. The sentinel itself is not part of the secret.
pub fn read_secret<R: BufRead>(reader: R) -> Result<Secret> {
    let mut lines: Vec<String> = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read secret input")?;
        let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
        if line == SECRET_SENTINEL {
            break;
        }
        lines.push(line);
    }

    let joined = lines.join("\n");
    if joined.trim().is_empty() {
        return Err(SwitchError::ConfigInvalid("secret must not be empty".to_string()).into());
    }
    Ok(Secret::new(joined))
}

/// Read the whole file as the secret, byte for byte.
pub fn read_secret_file(path: &Path) -> Result<Secret> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read secret file: {}", path.display()))?;
    if bytes.is_empty() {
        return Err(SwitchError::ConfigInvalid(format!(
            "secret file {} is empty",
            path.display()
        ))
        .into());
    }
    Ok(Secret::new(bytes))
}
