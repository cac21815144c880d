//! Locations the clicker reads and writes next to its executable.
//!
//! `targets.json` is looked up beside the exe first so a double-clicked
//! binary finds its config, and run logs go to `<exe_dir>/logs/`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// File name of the targets configuration.
pub const TARGETS_FILE: &str = "targets.json";

/// Directory containing the executable, `.` if it cannot be determined.
pub fn exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Where per-run log files are written: `<exe_dir>/logs/`
pub fn logs_dir() -> PathBuf {
    exe_dir().join("logs")
}

/// Returns the targets file to use when none is given on the command line:
/// `<exe_dir>/targets.json` if it exists, else `targets.json` in the working directory.
pub fn default_targets_path() -> PathBuf {
    resolve_targets_path(exe_dir())
}

fn resolve_targets_path(exe_dir: &Path) -> PathBuf {
    let beside_exe = exe_dir.join(TARGETS_FILE);
    if beside_exe.exists() {
        beside_exe
    } else {
        PathBuf::from(TARGETS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_targets_next_to_exe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TARGETS_FILE), "[]").unwrap();
        assert_eq!(resolve_targets_path(dir.path()), dir.path().join(TARGETS_FILE));
    }

    #[test]
    fn test_falls_back_to_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_targets_path(dir.path()), PathBuf::from(TARGETS_FILE));
    }

    #[test]
    fn test_logs_live_beside_exe() {
        assert_eq!(logs_dir(), exe_dir().join("logs"));
        assert!(logs_dir().ends_with("logs"));
    }
}
