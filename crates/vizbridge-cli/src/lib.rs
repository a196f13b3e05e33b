//! Vizbridge CLI -- library half of the `vizbridge` binary.
//!
//! Holds config loading, path helpers and the operation runner so the
//! integration tests can drive them without spawning a process.

pub mod config;
pub mod ops;

use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
