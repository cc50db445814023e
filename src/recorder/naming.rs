//! Output file naming

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Container written by the capture backend
pub const RECORDING_EXTENSION: &str = "webm";

const FALLBACK_NAME: &str = "unnamed_stream";

/// Lowercase, collapse anything outside `[a-z0-9]` into single underscores
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<name>_<YYYY-MM-DD_HH-MM-SS>_<session prefix>.webm` inside `dir`.
///
/// The session prefix keeps two same-named streams started in the same
/// second apart.
pub fn output_path(dir: &Path, display_name: &str, started_at: DateTime<Utc>, session_id: &str) -> PathBuf {
    let suffix: String = session_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    dir.join(format!(
        "{}_{}_{}.{}",
        sanitize_name(display_name),
        started_at.format("%Y-%m-%d_%H-%M-%S"),
        suffix,
        RECORDING_EXTENSION
    ))
}
