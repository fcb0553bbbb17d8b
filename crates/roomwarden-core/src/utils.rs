//! Utility helpers — path resolution and string shaping.

use std::path::PathBuf;

/// Get the Roomwarden data directory (e.g. `~/.roomwarden/`).
pub fn get_data_path() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".roomwarden")
}

/// Resolve the registry file location from the configured path string.
pub fn registry_path(configured: &str) -> PathBuf {
    if configured.trim().is_empty() {
        get_data_path().join("registry.json")
    } else {
        expand_home(configured)
    }
}

/// Truncate to at most `max_chars` characters. Unicode-safe, no ellipsis.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => s[..byte].to_string(),
        None => s.to_string(),
    }
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(rest)
    } else if path == "~" {
        home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from(path)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}
