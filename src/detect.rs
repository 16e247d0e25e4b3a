//! Change detection between the current tree and the stored hash map
//!
//! Classifies files as added, modified, deleted, or unchanged. The
//! quick path compares `{size, mtime}` against the stored entry and
//! marks the file unchanged without reading content; anything else
//! hashes the content and compares. An equal hash with drifted stat
//! (timestamp-only touch, copy) is still unchanged — the fresh stat is
//! written into the new map so the shortcut recovers on the next run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash;
use crate::walker::FileInfo;

/// Stored identity of one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashEntry {
    pub relative_path: String,
    /// Hex BLAKE3 digest of the file content
    pub content_hash: String,
    pub size_bytes: u64,
    pub last_modified: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectOptions {
    /// Skip the stat shortcut and hash every file (forced full check)
    pub ignore_stat: bool,
}

/// Classified diff of a tree against the stored map.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<FileInfo>,
    pub modified: Vec<FileInfo>,
    /// Relative paths present in the stored map but gone from the tree
    pub deleted: Vec<String>,
    pub unchanged: Vec<FileInfo>,
    /// The complete map for the current tree, ready to persist at
    /// commit time. Keyed by relative path.
    pub new_hashes: BTreeMap<String, FileHashEntry>,
}

impl ChangeSet {
    /// Files whose chunks must be (re)embedded.
    pub fn to_index(&self) -> impl Iterator<Item = &FileInfo> {
        self.added.iter().chain(self.modified.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Diff `current_files` against `stored`. Reads file content only when
/// the stat shortcut misses; unreadable files are skipped with a
/// warning (they will surface as deleted if they stay unreadable).
pub fn detect(
    current_files: &[FileInfo],
    stored: &BTreeMap<String, FileHashEntry>,
    options: DetectOptions,
) -> ChangeSet {
    let mut set = ChangeSet::default();

    for file in current_files {
        let previous = stored.get(&file.relative_path);

        if !options.ignore_stat {
            if let Some(prev) = previous {
                if prev.size_bytes == file.size_bytes && prev.last_modified == file.last_modified {
                    set.new_hashes
                        .insert(file.relative_path.clone(), prev.clone());
                    set.unchanged.push(file.clone());
                    continue;
                }
            }
        }

        let content = match std::fs::read(&file.absolute_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    path = %file.relative_path,
                    error = %e,
                    "File unreadable during change detection, skipping"
                );
                continue;
            }
        };
        let content_hash = hash::content_hash(&content);
        let entry = FileHashEntry {
            relative_path: file.relative_path.clone(),
            content_hash: content_hash.clone(),
            size_bytes: file.size_bytes,
            last_modified: file.last_modified,
        };

        match previous {
            None => {
                set.new_hashes.insert(file.relative_path.clone(), entry);
                set.added.push(file.clone());
            }
            Some(prev) if prev.content_hash == content_hash => {
                // Stat drifted but content did not: refresh the stat so
                // the shortcut works next run
                set.new_hashes.insert(file.relative_path.clone(), entry);
                set.unchanged.push(file.clone());
            }
            Some(_) => {
                set.new_hashes.insert(file.relative_path.clone(), entry);
                set.modified.push(file.clone());
            }
        }
    }

    for path in stored.keys() {
        if !set.new_hashes.contains_key(path) {
            set.deleted.push(path.clone());
        }
    }
    set.deleted.sort();

    tracing::debug!(
        added = set.added.len(),
        modified = set.modified.len(),
        deleted = set.deleted.len(),
        unchanged = set.unchanged.len(),
        "Change detection complete"
    );
    set
}
