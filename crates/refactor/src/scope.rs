//! Per-group transactional file tracking (C10).
//!
//! A [`ScopeTracker`] records exactly which files a group's implementation
//! agent touched, with a byte snapshot of each file's pre-edit contents as a
//! fallback restoration path if git's scoped checkout fails.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use refactor_types::ChunkData;

/// Sentinel tokens in a chunk's `file_path` prose that mean "no single file
/// to track" rather than a real path.
const UNTRACKABLE_SENTINELS: &[&str] = &["multiple", "various", "n/a", "unknown"];

const RECOGNIZED_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs", "ts", "tsx"];

/// Report returned by [`ScopeTracker::reset_scoped`].
#[derive(Debug, Clone, Default)]
pub struct ScopeResetReport {
    pub files_reset: usize,
    pub untracked_changes: Vec<PathBuf>,
}

pub struct ScopeTracker {
    project_root: PathBuf,
    base_path: PathBuf,
    tracked_files: BTreeSet<PathBuf>,
    original_content: BTreeMap<PathBuf, Vec<u8>>,
}

impl ScopeTracker {
    pub fn new(project_root: impl Into<PathBuf>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            base_path: base_path.into(),
            tracked_files: BTreeSet::new(),
            original_content: BTreeMap::new(),
        }
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        self.tracked_files.iter().cloned().collect()
    }

    /// Track a single file: resolve it relative to `base_path` if needed,
    /// then snapshot its current bytes (best effort — a brand new file has
    /// nothing to snapshot).
    pub fn track(&mut self, file_path: &Path) -> Result<()> {
        let joined = if file_path.is_absolute() || file_path.starts_with(&self.base_path) {
            file_path.to_path_buf()
        } else {
            self.base_path.join(file_path)
        };
        let absolute = if joined.is_absolute() {
            joined
        } else {
            self.project_root.join(joined)
        };

        if let Ok(bytes) = std::fs::read(&absolute) {
            self.original_content.insert(absolute.clone(), bytes);
        }
        self.tracked_files.insert(absolute);
        Ok(())
    }

    /// Interpret a chunk's `file_path` and track the recognized entries.
    /// Prose sentinels ("multiple", "various", "n/a") are ignored; only
    /// paths with a recognized source extension are tracked.
    pub fn track_from_chunk(&mut self, chunk: &ChunkData) -> Result<()> {
        let raw = chunk.file_path.to_string_lossy();
        for entry in raw.split(',') {
            let trimmed = entry.trim().trim_matches('`');
            if trimmed.is_empty() {
                continue;
            }
            if UNTRACKABLE_SENTINELS
                .iter()
                .any(|s| trimmed.eq_ignore_ascii_case(s))
            {
                continue;
            }
            let path = PathBuf::from(trimmed);
            let has_recognized_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| RECOGNIZED_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if has_recognized_ext {
                self.track(&path)?;
            }
        }
        Ok(())
    }

    /// Ask the Git Adapter to checkout HEAD for every tracked path. On
    /// failure, falls back to restoring each file from its snapshot.
    /// Reports tracked files reset vs. files dirty in the tree but outside
    /// this scope (left untouched either way).
    pub fn reset_scoped(&self) -> Result<ScopeResetReport> {
        let relative: Vec<PathBuf> = self
            .tracked_files
            .iter()
            .map(|f| {
                f.strip_prefix(&self.project_root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| f.clone())
            })
            .collect();

        let files_reset = if !relative.is_empty() {
            match refactor_git::scoped_reset(&self.project_root, &relative) {
                Ok(()) => relative.len(),
                Err(e) => {
                    warn!(error = %e, "git scoped reset failed, restoring from snapshot");
                    self.restore_snapshots()
                }
            }
        } else {
            0
        };

        let untracked_changes = refactor_git::get_modified_files(&self.project_root)
            .unwrap_or_default()
            .into_iter()
            .filter(|f| {
                let absolute = self.project_root.join(f);
                !self.tracked_files.contains(&absolute)
            })
            .collect();

        Ok(ScopeResetReport {
            files_reset,
            untracked_changes,
        })
    }

    fn restore_snapshots(&self) -> usize {
        let mut restored = 0;
        for (path, bytes) in &self.original_content {
            if std::fs::write(path, bytes).is_ok() {
                restored += 1;
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_chunk(file_path: &str) -> ChunkData {
        ChunkData {
            number: 1,
            title: "t".into(),
            file_path: PathBuf::from(file_path),
            line_number: None,
            current_code: "a".into(),
            refactored_code: "b".into(),
            affected_pages: vec!["/x".into()],
        }
    }

    #[test]
    fn track_snapshots_existing_file_contents() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("foo.ts");
        std::fs::write(&file, b"original").unwrap();

        let mut scope = ScopeTracker::new(dir.path(), "");
        scope.track(Path::new("foo.ts")).unwrap();

        assert_eq!(scope.tracked_files().len(), 1);
        assert_eq!(
            scope.original_content.get(&dir.path().join("foo.ts")).unwrap(),
            b"original"
        );
    }

    #[test]
    fn track_from_chunk_ignores_sentinel_values() {
        let mut scope = ScopeTracker::new(".", "");
        scope.track_from_chunk(&sample_chunk("multiple")).unwrap();
        assert!(scope.tracked_files().is_empty());
    }

    #[test]
    fn track_from_chunk_ignores_unrecognized_extension() {
        let mut scope = ScopeTracker::new(".", "");
        scope.track_from_chunk(&sample_chunk("README.md")).unwrap();
        assert!(scope.tracked_files().is_empty());
    }

    #[test]
    fn track_from_chunk_tracks_recognized_source_file() {
        let dir = tempdir().expect("tempdir");
        let mut scope = ScopeTracker::new(dir.path(), "");
        scope.track_from_chunk(&sample_chunk("src/foo.ts")).unwrap();
        assert_eq!(scope.tracked_files().len(), 1);
    }

    #[test]
    fn track_from_chunk_handles_comma_separated_list() {
        let dir = tempdir().expect("tempdir");
        let mut scope = ScopeTracker::new(dir.path(), "");
        scope
            .track_from_chunk(&sample_chunk("src/a.ts, src/b.tsx"))
            .unwrap();
        assert_eq!(scope.tracked_files().len(), 2);
    }

    #[test]
    fn restore_snapshots_writes_back_original_bytes() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("foo.ts");
        std::fs::write(&file, b"original").unwrap();

        let mut scope = ScopeTracker::new(dir.path(), "");
        scope.track(Path::new("foo.ts")).unwrap();
        std::fs::write(&file, b"mutated").unwrap();

        let restored = scope.restore_snapshots();
        assert_eq!(restored, 1);
        assert_eq!(std::fs::read(&file).unwrap(), b"original");
    }
}
