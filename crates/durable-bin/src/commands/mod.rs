pub mod cat;
pub mod clean_tmp;
pub mod copy;
pub mod equal;
pub mod write;

use std::path::{Path, PathBuf};

use anyhow::Context;
use durable_fs::DirFs;

/// Splits a path into a handle rooted at its parent and the file name.
fn split_destination(path: &Path) -> anyhow::Result<(DirFs, PathBuf)> {
    let name = path
        .file_name()
        .with_context(|| format!("'{}' does not name a file", path.display()))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((DirFs::new(parent), PathBuf::from(name)))
}

/// Parses an octal permission string such as `644` or `0o755`.
fn parse_mode(mode: &str) -> Result<u32, String> {
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    match u32::from_str_radix(digits, 8) {
        Ok(bits) if bits <= 0o7777 => Ok(bits),
        Ok(_) => Err(format!("'{mode}' is out of range")),
        Err(err) => Err(format!("'{mode}' is not an octal mode: {err}")),
    }
}
