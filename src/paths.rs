//! Configuration file path resolution.
//!
//! A relative config path is looked up in this order:
//!
//! 1. the current working directory (typical with `cargo run`)
//! 2. the directory of the executable (portable install)
//! 3. the per-user config directory (`%APPDATA%\chatmix-gw` on Windows,
//!    `~/.config/chatmix-gw` on Linux)
//!
//! If none of them has the file, the executable directory is reported so the
//! "not found" message points where a portable install would expect it.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for the per-user config directory
const APP_NAME: &str = "chatmix-gw";

/// Config file used when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Directory containing the running executable
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Per-user config directory for this application
pub fn user_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Resolve `requested` against the standard search directories
pub fn resolve_config_path(requested: &Path) -> PathBuf {
    let mut bases = Vec::with_capacity(3);
    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    bases.push(exe_dir());
    if let Some(dir) = user_config_dir() {
        bases.push(dir);
    }

    resolve_in(requested, &bases, 1)
}

/// Resolve `requested` against `bases`
///
/// Absolute paths are returned unchanged. Otherwise the first base containing
/// the file wins; if none does, `bases[fallback]` (or the first base) is used.
pub fn resolve_in(requested: &Path, bases: &[PathBuf], fallback: usize) -> PathBuf {
    if requested.is_absolute() {
        return requested.to_path_buf();
    }

    for base in bases {
        let candidate = base.join(requested);
        debug!("Looking for config at {}", candidate.display());
        if candidate.is_file() {
            return candidate;
        }
    }

    bases
        .get(fallback)
        .or_else(|| bases.first())
        .map(|base| base.join(requested))
        .unwrap_or_else(|| requested.to_path_buf())
}
