//! Git operations for the refactor orchestrator.
//!
//! This crate provides the git operations the orchestrator needs: working
//! tree context for the run log, and scoped staging/commit/reset per
//! refactor group so a failed group's changes can be undone without
//! touching groups already committed.
//!
//! # Example
//!
//! ```
//! use refactor_git::{GitContext, is_git_clean, get_git_context};
//! use std::path::Path;
//!
//! // Check if the git working tree is clean
//! let clean = is_git_clean(Path::new(".")).unwrap_or(false);
//!
//! // Get git context for audit trail
//! let context = get_git_context(Path::new("."));
//! if let Some(commit) = context.commit {
//!     println!("Current commit: {}", commit);
//! }
//! ```

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Git context information for audit trail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitContext {
    /// Current commit hash
    pub commit: Option<String>,
    /// Current branch name
    pub branch: Option<String>,
    /// Current tag (if on a tag)
    pub tag: Option<String>,
    /// Whether the working tree is dirty
    pub dirty: Option<bool>,
}

impl GitContext {
    /// Create a new empty git context
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if we have commit information
    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }

    /// Check if the working tree is dirty
    pub fn is_dirty(&self) -> bool {
        self.dirty.unwrap_or(true)
    }

    /// Get a short commit hash (first 7 characters)
    pub fn short_commit(&self) -> Option<&str> {
        self.commit.as_ref().map(|c| {
            if c.len() > 7 {
                &c[..7]
            } else {
                c.as_str()
            }
        })
    }
}

/// Check if the git working tree is clean (no uncommitted changes)
pub fn is_git_clean(path: &Path) -> Result<bool> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(path)
        .output()
        .context("failed to run git status")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    // If output is empty, the working tree is clean
    Ok(output.stdout.is_empty())
}

/// Check if we're inside a git repository
pub fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get the current git commit hash
pub fn get_commit_hash(path: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(path)
        .output()
        .context("failed to run git rev-parse")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git rev-parse failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(hash)
}

/// Get the current branch name
pub fn get_branch(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(path)
        .output()
        .context("failed to run git rev-parse")?;

    if !output.status.success() {
        return Ok(None);
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    
    // If we're in detached HEAD state, return None
    if branch == "HEAD" {
        return Ok(None);
    }

    Ok(Some(branch))
}

/// Get the current tag (if on a tag)
pub fn get_tag(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["describe", "--exact-match", "--tags"])
        .current_dir(path)
        .output()
        .context("failed to run git describe")?;

    if !output.status.success() {
        return Ok(None);
    }

    let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(tag))
}

/// Get complete git context
pub fn get_git_context(path: &Path) -> GitContext {
    let commit = get_commit_hash(path).ok();
    let branch = get_branch(path).ok().flatten();
    let tag = get_tag(path).ok().flatten();
    let dirty = is_git_clean(path).ok().map(|c| !c);

    GitContext {
        commit,
        branch,
        tag,
        dirty,
    }
}

/// Ensure git working tree is clean (returns error if dirty)
pub fn ensure_git_clean(path: &Path) -> Result<()> {
    if !is_git_clean(path)? {
        return Err(anyhow::anyhow!(
            "git working tree has uncommitted changes. Use --allow-dirty to bypass."
        ));
    }
    Ok(())
}

/// Check if a tag exists for the current commit
pub fn has_tag_for_commit(path: &Path) -> bool {
    get_tag(path).ok().flatten().is_some()
}

/// Get the list of changed files (staged + unstaged)
pub fn get_changed_files(path: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(path)
        .output()
        .context("failed to run git status")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let status = String::from_utf8_lossy(&output.stdout);
    let files: Vec<String> = status
        .lines()
        .map(|line| {
            // Format is "XY filename" - extract just the filename
            line.chars().skip(3).collect()
        })
        .collect();

    Ok(files)
}

/// Get remote URL for a given remote name
pub fn get_remote_url(path: &Path, remote: &str) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["remote", "get-url", remote])
        .current_dir(path)
        .output()
        .context("failed to run git remote")?;

    if !output.status.success() {
        return Ok(None);
    }

    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(url))
}

/// Check if we're on a specific branch
pub fn is_on_branch(path: &Path, branch_name: &str) -> bool {
    get_branch(path)
        .ok()
        .flatten()
        .map(|b| b == branch_name)
        .unwrap_or(false)
}

/// Check if the current commit is tagged
pub fn is_on_tag(path: &Path) -> bool {
    get_tag(path).ok().flatten().is_some()
}

/// Stage a specific set of paths (relative or absolute) for commit.
///
/// Used to commit exactly the files a refactor group touched rather than
/// `git add .`, so unrelated in-flight edits in the working tree aren't
/// swept into the group's commit.
pub fn stage_paths(repo_root: &Path, paths: &[std::path::PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let output = Command::new("git")
        .arg("add")
        .args(paths)
        .current_dir(repo_root)
        .output()
        .context("failed to run git add")?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git add failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Commit the currently staged changes with the given message.
pub fn commit(repo_root: &Path, message: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(repo_root)
        .output()
        .context("failed to run git commit")?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git commit failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Reset a specific set of paths back to `HEAD`, discarding both the
/// working-tree and index changes for just those paths. Used to roll back
/// a refactor group whose validation failed, leaving earlier committed
/// groups and any other in-flight work untouched.
pub fn scoped_reset(repo_root: &Path, paths: &[std::path::PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let checkout = Command::new("git")
        .args(["checkout", "HEAD", "--"])
        .args(paths)
        .current_dir(repo_root)
        .output()
        .context("failed to run git checkout")?;
    if !checkout.status.success() {
        return Err(anyhow::anyhow!(
            "git checkout failed: {}",
            String::from_utf8_lossy(&checkout.stderr)
        ));
    }

    // A newly-created (never-committed) file has nothing for `checkout
    // HEAD --` to restore; remove it so the scope is fully reverted.
    for path in paths {
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            repo_root.join(path)
        };
        if absolute.exists() {
            let tracked = Command::new("git")
                .args(["ls-files", "--error-unmatch"])
                .arg(path)
                .current_dir(repo_root)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            if !tracked {
                let _ = std::fs::remove_file(&absolute);
            }
        }
    }

    Ok(())
}

/// Files with unstaged or staged changes (porcelain status), as repo-root
/// relative paths. Superset of [`get_modified_files`]/[`get_staged_files`].
pub fn get_changed_paths(repo_root: &Path) -> Result<Vec<std::path::PathBuf>> {
    get_changed_files(repo_root).map(|files| files.into_iter().map(Into::into).collect())
}

/// Files with unstaged working-tree changes (`git diff --name-only`).
pub fn get_modified_files(repo_root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let output = Command::new("git")
        .args(["diff", "--name-only"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git diff")?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(std::path::PathBuf::from)
        .collect())
}

/// Files currently staged for commit (`git diff --cached --name-only`),
/// plus any untracked files (new files an agent created are untracked
/// until staged).
pub fn get_staged_files(repo_root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let staged = Command::new("git")
        .args(["diff", "--cached", "--name-only"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git diff --cached")?;
    if !staged.status.success() {
        return Err(anyhow::anyhow!(
            "git diff --cached failed: {}",
            String::from_utf8_lossy(&staged.stderr)
        ));
    }

    let untracked = Command::new("git")
        .args(["ls-files", "--others", "--exclude-standard"])
        .current_dir(repo_root)
        .output()
        .context("failed to run git ls-files")?;

    let mut files: Vec<std::path::PathBuf> = String::from_utf8_lossy(&staged.stdout)
        .lines()
        .map(std::path::PathBuf::from)
        .collect();
    if untracked.status.success() {
        files.extend(
            String::from_utf8_lossy(&untracked.stdout)
                .lines()
                .map(std::path::PathBuf::from),
        );
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use std::process::Command;

    fn init_git_repo(dir: &Path) {
        Command::new("git")
            .args(["init"])
            .current_dir(dir)
            .output()
            .expect("git init");

        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .expect("git config");

        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(dir)
            .output()
            .expect("git config");
    }

    fn make_commit(dir: &Path, msg: &str) {
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", msg])
            .current_dir(dir)
            .output()
            .expect("git commit");
    }

    #[test]
    fn is_git_repo_detects_repo() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());

        assert!(is_git_repo(td.path()));
    }

    #[test]
    fn is_git_repo_returns_false_for_non_repo() {
        let td = tempdir().expect("tempdir");
        assert!(!is_git_repo(td.path()));
    }

    #[test]
    fn is_git_clean_for_empty_repo() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());

        // Empty repo should be clean
        assert!(is_git_clean(td.path()).unwrap_or(false));
    }

    #[test]
    fn get_commit_hash_returns_hash() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let hash = get_commit_hash(td.path()).expect("commit hash");
        assert_eq!(hash.len(), 40); // SHA-1 hash is 40 hex characters
    }

    #[test]
    fn get_branch_returns_branch() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        // After init, we might be on master or main
        let branch = get_branch(td.path()).expect("branch");
        // Could be "master", "main", or None depending on git version
        assert!(branch.is_none() || branch.as_ref().map_or(false, |b| b == "master" || b == "main"));
    }

    #[test]
    fn get_git_context_populates_fields() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let context = get_git_context(td.path());

        assert!(context.has_commit());
        assert!(!context.is_dirty()); // Clean working tree
        assert!(context.short_commit().is_some());
    }

    #[test]
    fn git_context_default() {
        let context = GitContext::new();
        assert!(!context.has_commit());
        assert!(context.commit.is_none());
        assert!(context.branch.is_none());
    }

    #[test]
    fn short_commit_truncates() {
        let mut context = GitContext::new();
        context.commit = Some("0123456789abcdef0123456789abcdef01234567".to_string());

        assert_eq!(context.short_commit(), Some("0123456"));
    }

    #[test]
    fn ensure_git_clean_succeeds_when_clean() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        assert!(ensure_git_clean(td.path()).is_ok());
    }

    #[test]
    fn get_changed_files_empty_when_clean() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let files = get_changed_files(td.path()).expect("changed files");
        assert!(files.is_empty());
    }

    #[test]
    fn get_remote_url_none_when_no_remote() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());

        let url = get_remote_url(td.path(), "origin").expect("remote url");
        assert!(url.is_none());
    }

    #[test]
    fn stage_and_commit_a_tracked_change() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        std::fs::write(td.path().join("a.txt"), "one").expect("write");
        Command::new("git")
            .args(["add", "a.txt"])
            .current_dir(td.path())
            .output()
            .expect("add");
        make_commit(td.path(), "init");

        std::fs::write(td.path().join("a.txt"), "two").expect("write");
        let modified = get_modified_files(td.path()).expect("modified");
        assert_eq!(modified, vec![std::path::PathBuf::from("a.txt")]);

        stage_paths(td.path(), &[std::path::PathBuf::from("a.txt")]).expect("stage");
        let staged = get_staged_files(td.path()).expect("staged");
        assert_eq!(staged, vec![std::path::PathBuf::from("a.txt")]);

        commit(td.path(), "update a").expect("commit");
        assert!(is_git_clean(td.path()).unwrap_or(false));
    }

    #[test]
    fn scoped_reset_discards_only_named_paths() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        std::fs::write(td.path().join("keep.txt"), "keep").expect("write");
        std::fs::write(td.path().join("revert.txt"), "original").expect("write");
        Command::new("git")
            .args(["add", "."])
            .current_dir(td.path())
            .output()
            .expect("add");
        make_commit(td.path(), "init");

        std::fs::write(td.path().join("keep.txt"), "keep-modified").expect("write");
        std::fs::write(td.path().join("revert.txt"), "modified").expect("write");

        scoped_reset(td.path(), &[std::path::PathBuf::from("revert.txt")]).expect("reset");

        let reverted = std::fs::read_to_string(td.path().join("revert.txt")).expect("read");
        assert_eq!(reverted, "original");
        let kept = std::fs::read_to_string(td.path().join("keep.txt")).expect("read");
        assert_eq!(kept, "keep-modified");
    }

    #[test]
    fn scoped_reset_removes_untracked_file() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "init");

        let new_file = td.path().join("new.txt");
        std::fs::write(&new_file, "brand new").expect("write");
        scoped_reset(td.path(), &[std::path::PathBuf::from("new.txt")]).expect("reset");
        assert!(!new_file.exists());
    }
}