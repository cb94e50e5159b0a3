//! Paused-run state persistence for the refactor orchestrator.
//!
//! A run that pauses (consecutive validation failures, `Ctrl-C`, or an
//! unavailable agent CLI) writes a [`RunRecord`] to disk before exiting so
//! that `refactor-cli resume` can pick back up at the next group instead of
//! restarting the whole plan.
//!
//! # Example
//!
//! ```
//! use refactor_state::{save_state, load_state, STATE_FILE};
//! use refactor_types::{RunRecord, PauseReason};
//! use std::path::PathBuf;
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let record = RunRecord {
//!     plan_path: PathBuf::from("plan.md"),
//!     group_index: 2,
//!     total_groups: 5,
//!     timestamp: chrono::Utc::now(),
//!     reason: PauseReason::ConsecutiveFailures,
//! };
//! save_state(dir.path(), &record).unwrap();
//! let loaded = load_state(dir.path()).unwrap();
//! assert_eq!(loaded.group_index, 2);
//! assert!(dir.path().join(STATE_FILE).exists());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use refactor_types::RunRecord;

/// Default paused-run state file name.
pub const STATE_FILE: &str = "paused_run.json";

/// State file path for a given state directory.
pub fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// Persist a [`RunRecord`] to `<state_dir>/paused_run.json`, creating the
/// directory if needed. Writes atomically via a temp file + rename so a
/// crash mid-write never leaves a half-written record.
pub fn save_state(state_dir: &Path, record: &RunRecord) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;

    let path = state_path(state_dir);
    let tmp_path = state_dir.join(format!("{STATE_FILE}.tmp"));
    let json = serde_json::to_string_pretty(record).context("failed to serialize run record")?;
    fs::write(&tmp_path, json)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to finalize {}", path.display()))?;
    Ok(())
}

/// Load a previously-saved [`RunRecord`] from a state directory.
///
/// Returns an error if the file is missing or not valid JSON; callers
/// (`resume`) should surface that as "no paused run to resume".
pub fn load_state(state_dir: &Path) -> Result<RunRecord> {
    let path = state_path(state_dir);
    let bytes = fs::read(&path).with_context(|| format!("no paused run at {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a valid run record", path.display()))
}

/// Remove a persisted [`RunRecord`] after a resumed run completes or the
/// operator discards it. Missing files are not an error.
pub fn clear_state(state_dir: &Path) -> Result<()> {
    let path = state_path(state_dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}
