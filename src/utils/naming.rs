//! Output file naming

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Timestamp layout used in file names (no characters that need escaping)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// `<prefix>_<timestamp>.<ext>`
pub fn output_file_name(prefix: &str, at: DateTime<Local>, extension: &str) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() { "recording" } else { prefix };
    format!("{}_{}.{}", prefix, at.format(TIMESTAMP_FORMAT), extension)
}

/// Full output path for a recording starting now
pub fn output_path(dir: &Path, prefix: &str) -> PathBuf {
    output_path_at(dir, prefix, Local::now())
}

/// Output path for a recording starting at `at`
///
/// Never returns an existing file: a name already taken within the same
/// second gets a `_2`, `_3`, ... suffix.
pub fn output_path_at(dir: &Path, prefix: &str, at: DateTime<Local>) -> PathBuf {
    let path = dir.join(output_file_name(prefix, at, "mp4"));
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    (2u32..)
        .map(|n| dir.join(format!("{}_{}.mp4", stem, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}
