use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File-name-safe key for a channel URL or id: the last non-empty path
/// segment with anything outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn cache_slug(source: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or_default();
    let segment = without_query
        .split('/')
        .rev()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let slug: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.trim_matches('_').is_empty() {
        let digest = Sha256::digest(source.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        return format!("channel-{hex}");
    }
    slug
}

pub fn cache_path(cache_dir: &Path, source: &str) -> PathBuf {
    cache_dir.join(format!("{}.json", cache_slug(source)))
}

/// Cached raw rows for `source`, or `None` when there is no usable entry.
/// A corrupt file is reported and treated as a miss.
pub fn load<T: DeserializeOwned>(cache_dir: &Path, source: &str) -> Option<Vec<T>> {
    let path = cache_path(cache_dir, source);
    let raw = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(rows) => {
            debug!(path = %path.display(), count = rows.len(), "cache hit");
            Some(rows)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable cache file");
            None
        }
    }
}

/// Store the pre-conversion rows for `source` as one JSON array.
pub fn save<T: Serialize>(cache_dir: &Path, source: &str, rows: &[T]) -> Result<PathBuf> {
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create {}", cache_dir.display()))?;
    let path = cache_path(cache_dir, source);
    let body = serde_json::to_string_pretty(rows)?;
    fs::write(&path, format!("{body}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
