//! Path utilities for Retainer
//!
//! Handles tilde expansion and resolution against the app root.

use std::path::PathBuf;

/// Expands a leading tilde (~) to the user's home directory.
/// Examples:
/// "~/.retainer" -> "/home/ops/.retainer"
/// "/tmp/foo" -> "/tmp/foo" (no change)
pub fn expand_tilde(path: &str) -> String {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => format!("{}/{}", home_dir(), rest),
        None => path.to_string(),
    }
}

/// Helper to convert a potentially tilde-containing string into a PathBuf.
pub fn get_path(path: &str) -> PathBuf {
    PathBuf::from(expand_tilde(path))
}

/// Resolves the Retainer app root from RETAINER_ROOT.
/// Handles absolute paths, tilde expansion, and bare names under $HOME.
pub fn get_app_root() -> PathBuf {
    let root_name = std::env::var("RETAINER_ROOT").unwrap_or_else(|_| ".retainer".to_string());
    resolve_root(&root_name)
}

fn resolve_root(root_name: &str) -> PathBuf {
    if root_name.starts_with('/') {
        PathBuf::from(root_name)
    } else if root_name.starts_with('~') {
        get_path(root_name)
    } else {
        PathBuf::from(home_dir()).join(root_name)
    }
}

/// Ensures a path is absolute, resolving tilde and relative to app root.
pub fn ensure_absolute(path: &str) -> PathBuf {
    let p = get_path(path);
    if p.is_absolute() {
        p
    } else {
        get_app_root().join(p)
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
