// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-repostate
//!
//! Composite fingerprint of the repository state: HEAD commit, staged
//! changes, working-tree changes, and the untracked file list. Every call
//! to [`RepoState::current`] re-reads the VCS; callers cache under their
//! own discipline.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ckb_core::RepoStateStamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Which repo-state component a tool keys its cache on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStateMode {
    /// Metadata-only tools: key by HEAD commit.
    Head,
    /// Location-sensitive tools: key by the full fingerprint.
    Full,
}

/// Snapshot of the repository state at one instant.
///
/// The individual hashes are empty strings when the corresponding component
/// is empty (no staged changes, clean working tree, no untracked files), so
/// `dirty` is derivable: it is `true` iff any of the three is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    /// SHA-256 over the four components below.
    pub fingerprint: String,
    /// Commit hash of HEAD.
    pub head_commit: String,
    /// Hash of the staged diff, empty when nothing is staged.
    pub staged_hash: String,
    /// Hash of the working-tree diff, empty when clean.
    pub working_hash: String,
    /// Hash of the sorted untracked file list, empty when none.
    pub untracked_hash: String,
    /// Whether any of staged/working/untracked is non-empty.
    pub dirty: bool,
    /// When this snapshot was computed.
    pub computed_at: DateTime<Utc>,
}

impl RepoState {
    /// Recompute the repository state. Always re-reads the VCS.
    ///
    /// # Errors
    ///
    /// Fails when `path` is not inside a git repository or git itself
    /// cannot be invoked.
    pub fn current(path: &Path) -> Result<Self> {
        let head_commit = run_git(path, &["rev-parse", "HEAD"])
            .context("resolve HEAD")?
            .trim()
            .to_string();

        let staged = run_git(path, &["diff", "--cached", "--no-color"]).context("staged diff")?;
        let working = run_git(path, &["diff", "--no-color"]).context("working diff")?;
        let untracked = run_git(path, &["ls-files", "--others", "--exclude-standard"])
            .context("untracked list")?;

        let staged_hash = hash_nonempty(&staged);
        let working_hash = hash_nonempty(&working);
        let untracked_hash = hash_sorted_lines(&untracked);

        let dirty =
            !staged_hash.is_empty() || !working_hash.is_empty() || !untracked_hash.is_empty();

        let fingerprint = fingerprint_of(&head_commit, &staged_hash, &working_hash, &untracked_hash);

        debug!(
            target: "ckb.repostate",
            head = %head_commit,
            dirty,
            "computed repo state"
        );

        Ok(Self {
            fingerprint,
            head_commit,
            staged_hash,
            working_hash,
            untracked_hash,
            dirty,
            computed_at: Utc::now(),
        })
    }

    /// The cache key for a tool in the given mode.
    #[must_use]
    pub fn state_key(&self, mode: RepoStateMode) -> &str {
        match mode {
            RepoStateMode::Head => &self.head_commit,
            RepoStateMode::Full => &self.fingerprint,
        }
    }

    /// The envelope stamp for this state.
    #[must_use]
    pub fn stamp(&self) -> RepoStateStamp {
        RepoStateStamp {
            fingerprint: self.fingerprint.clone(),
            head_commit: self.head_commit.clone(),
            dirty: self.dirty,
        }
    }
}

/// Compute the composite fingerprint from the four components.
///
/// Two processes observing the same four inputs produce identical output.
#[must_use]
pub fn fingerprint_of(head: &str, staged: &str, working: &str, untracked: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [head, staged, working, untracked] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    ckb_core::hex_lower(&hasher.finalize())
}

fn hash_nonempty(content: &str) -> String {
    if content.trim().is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    ckb_core::hex_lower(&hasher.finalize())
}

fn hash_sorted_lines(content: &str) -> String {
    let mut lines: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    lines.sort_unstable();
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update([b'\n']);
    }
    ckb_core::hex_lower(&hasher.finalize())
}

fn run_git(path: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .with_context(|| format!("run git {args:?}"))?;

    if !out.status.success() {
        anyhow::bail!(
            "git {:?} failed (code={:?}): {}",
            args,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn fixture_repo() -> TempDir {
        let dir = TempDir::new().expect("create temp dir");
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["config", "user.name", "ckb"]);
        git(dir.path(), &["config", "user.email", "ckb@local"]);
        fs::write(dir.path().join("lib.rs"), "pub fn one() {}\n").unwrap();
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-qm", "baseline"]);
        dir
    }

    #[test]
    fn clean_repo_is_not_dirty() {
        let repo = fixture_repo();
        let state = RepoState::current(repo.path()).unwrap();
        assert!(!state.dirty);
        assert!(state.staged_hash.is_empty());
        assert!(state.working_hash.is_empty());
        assert!(state.untracked_hash.is_empty());
        assert!(!state.head_commit.is_empty());
    }

    #[test]
    fn fingerprint_is_deterministic_for_unchanged_state() {
        let repo = fixture_repo();
        let a = RepoState::current(repo.path()).unwrap();
        let b = RepoState::current(repo.path()).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.state_key(RepoStateMode::Full), b.state_key(RepoStateMode::Full));
    }

    #[test]
    fn working_tree_edit_changes_fingerprint() {
        let repo = fixture_repo();
        let before = RepoState::current(repo.path()).unwrap();
        fs::write(repo.path().join("lib.rs"), "pub fn one() {}\npub fn two() {}\n").unwrap();
        let after = RepoState::current(repo.path()).unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);
        assert!(after.dirty);
        assert!(!after.working_hash.is_empty());
        // HEAD is unchanged, so head-mode keys still match.
        assert_eq!(
            before.state_key(RepoStateMode::Head),
            after.state_key(RepoStateMode::Head)
        );
    }

    #[test]
    fn untracked_file_marks_dirty() {
        let repo = fixture_repo();
        fs::write(repo.path().join("scratch.txt"), "notes").unwrap();
        let state = RepoState::current(repo.path()).unwrap();
        assert!(state.dirty);
        assert!(!state.untracked_hash.is_empty());
        assert!(state.staged_hash.is_empty());
    }

    #[test]
    fn staged_change_marks_dirty() {
        let repo = fixture_repo();
        fs::write(repo.path().join("lib.rs"), "pub fn renamed() {}\n").unwrap();
        git(repo.path(), &["add", "-A"]);
        let state = RepoState::current(repo.path()).unwrap();
        assert!(state.dirty);
        assert!(!state.staged_hash.is_empty());
    }

    #[test]
    fn fingerprint_of_is_pure() {
        let a = fingerprint_of("head", "s", "w", "u");
        let b = fingerprint_of("head", "s", "w", "u");
        assert_eq!(a, b);
        assert_ne!(a, fingerprint_of("head", "s", "w", ""));
        // Component boundaries matter: ("ab","c") != ("a","bc").
        assert_ne!(fingerprint_of("ab", "c", "", ""), fingerprint_of("a", "bc", "", ""));
    }

    #[test]
    fn stamp_reflects_state() {
        let repo = fixture_repo();
        let state = RepoState::current(repo.path()).unwrap();
        let stamp = state.stamp();
        assert_eq!(stamp.fingerprint, state.fingerprint);
        assert_eq!(stamp.head_commit, state.head_commit);
        assert!(!stamp.dirty);
    }

    #[test]
    fn outside_a_repo_errors() {
        let dir = TempDir::new().unwrap();
        assert!(RepoState::current(dir.path()).is_err());
    }
}
