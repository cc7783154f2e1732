// SPDX-License-Identifier: MIT OR Apache-2.0
//! The shared filtered tree walker.
//!
//! Both detectors walk through this one filter so skip rules cannot
//! diverge: hidden directories, `node_modules`, and `vendor` are never
//! entered, and oversized files are never read.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories no detector descends into.
const SKIP_DIRS: &[&str] = &["node_modules", "vendor", "target", ".git"];

/// Files larger than this are never read.
pub const MAX_FILE_BYTES: u64 = 2_097_152;

/// One file yielded by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Absolute path on disk.
    pub abs: PathBuf,
    /// Repo-relative canonical path.
    pub rel: String,
}

/// Walk `root`, yielding regular files that pass the shared skip rules.
pub fn walk_repo(root: &Path) -> Vec<WalkedFile> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_dir() {
                // Generator marker directories are evidence, not noise.
                if name == ".openapi-generator" {
                    return true;
                }
                return !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref());
            }
            true
        });

    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_FILE_BYTES {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        files.push(WalkedFile {
            abs: entry.path().to_path_buf(),
            rel: ckb_core::paths::canonicalize_rel(&rel),
        });
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    files
}

/// Whether any path segment matches one of the internal markers.
pub fn path_has_segment(path: &str, segments: &[&str]) -> bool {
    path.split('/').any(|part| segments.contains(&part))
}
