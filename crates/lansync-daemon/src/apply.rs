//! Applying an incoming update batch to the local tree.
//!
//! A batch is an ordered list mixing upserts and deletes. Upserts are
//! applied in the order received, deletes afterwards, so a rename pushed
//! as "copy your own bytes to the new path, then drop the old one" always
//! finds its copy source intact.
//!
//! Every entry is applied on a best-effort basis; one bad entry never
//! aborts the rest of the batch. Failures are collected into the report
//! and surfaced to the sender.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lansync_core::hash::fingerprint_reader;
use lansync_core::protocol::FileEntry;
use lansync_core::safe_join;
use lansync_core::SyncState;
use tracing::debug;

/// Outcome of applying one update batch.
#[derive(Debug, Default, PartialEq)]
pub struct ApplyReport {
    pub upserts: usize,
    pub deletes: usize,
    pub errors: Vec<String>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable summary for the wire response.
    pub fn message(&self) -> String {
        if self.is_success() {
            format!("applied {} upserts, {} deletes", self.upserts, self.deletes)
        } else {
            self.errors.join("; ")
        }
    }
}

/// Apply `entries` to the tree owned by `state`.
///
/// Purely filesystem-side: the caller is responsible for suppressing the
/// watcher around this and for rebuilding the index afterwards.
pub fn apply_update(state: &SyncState, entries: &[FileEntry]) -> ApplyReport {
    let root = state.directory();
    let mut report = ApplyReport::default();

    for entry in entries.iter().filter(|e| !e.delete) {
        let applied = if entry.is_dir {
            create_directory(root, entry)
        } else if entry.content.is_some() {
            write_content(root, entry)
        } else {
            materialize_from_local(root, state, entry)
        };
        match applied {
            Ok(()) => report.upserts += 1,
            Err(message) => report.errors.push(message),
        }
    }

    for entry in entries.iter().filter(|e| e.delete) {
        match remove_path(root, entry) {
            Ok(()) => report.deletes += 1,
            Err(message) => report.errors.push(message),
        }
    }

    report
}

fn create_directory(root: &Path, entry: &FileEntry) -> Result<(), String> {
    let path = resolve(root, entry)?;
    remove_type_conflict(&path, entry)?;
    fs::create_dir_all(&path).map_err(|e| format!("{}: {}", entry.path, e))?;
    apply_mode(&path, entry)?;
    debug!("created directory {}", entry.path);
    Ok(())
}

/// Materialize a content-free entry by duplicating a local file that
/// already holds the same fingerprint. On replay the target may already be
/// that file, in which case only metadata is reapplied.
fn materialize_from_local(root: &Path, state: &SyncState, entry: &FileEntry) -> Result<(), String> {
    let source_rel = state.path_for_hash(entry.hash).ok_or_else(|| {
        format!(
            "{}: no local content with fingerprint {:016x}",
            entry.path, entry.hash
        )
    })?;
    let target = resolve(root, entry)?;

    if source_rel != entry.path {
        let source = safe_join(root, &source_rel)
            .ok_or_else(|| format!("{}: invalid copy source {}", entry.path, source_rel))?;

        // The index can trail the disk; re-hash the source so we never
        // duplicate bytes other than the ones the sender meant.
        let current = File::open(&source)
            .and_then(fingerprint_reader)
            .map_err(|e| format!("{}: cannot read copy source {}: {}", entry.path, source_rel, e))?;
        if current != entry.hash {
            return Err(format!(
                "{}: content of {} changed before it could be copied",
                entry.path, source_rel
            ));
        }

        create_parent(&target, entry)?;
        remove_type_conflict(&target, entry)?;
        fs::copy(&source, &target).map_err(|e| format!("{}: {}", entry.path, e))?;
        debug!("copied {} -> {}", source_rel, entry.path);
    }

    // mtime first: applying a read-only mode would lock out the write-open
    // that set_modified needs.
    apply_mtime(&target, entry)?;
    apply_mode(&target, entry)
}

fn write_content(root: &Path, entry: &FileEntry) -> Result<(), String> {
    let path = resolve(root, entry)?;
    let content = entry.content.as_deref().unwrap_or_default();

    create_parent(&path, entry)?;
    remove_type_conflict(&path, entry)?;
    fs::write(&path, content).map_err(|e| format!("{}: {}", entry.path, e))?;
    debug!("wrote {} ({} bytes)", entry.path, content.len());

    apply_mtime(&path, entry)?;
    apply_mode(&path, entry)
}

fn remove_path(root: &Path, entry: &FileEntry) -> Result<(), String> {
    let path = resolve(root, entry)?;
    match fs::symlink_metadata(&path) {
        Ok(metadata) => {
            let removed = if metadata.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| format!("{}: {}", entry.path, e))?;
            debug!("removed {}", entry.path);
            Ok(())
        }
        // Already gone: deleting is idempotent
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("{}: {}", entry.path, e)),
    }
}

/// Remove whatever occupies the target path if its type does not match the
/// incoming entry. Writing a file over a directory (or the reverse) would
/// otherwise fail every batch, leaving the two trees permanently diverged
/// on that path.
fn remove_type_conflict(path: &Path, entry: &FileEntry) -> Result<(), String> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() != entry.is_dir => {
            let removed = if metadata.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            removed.map_err(|e| format!("{}: {}", entry.path, e))?;
            debug!("replaced {} (type changed)", entry.path);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn resolve(root: &Path, entry: &FileEntry) -> Result<PathBuf, String> {
    safe_join(root, &entry.path).ok_or_else(|| format!("{}: path escapes the sync root", entry.path))
}

fn create_parent(path: &Path, entry: &FileEntry) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("{}: {}", entry.path, e))?;
    }
    Ok(())
}

/// Preserve the sender's modification time so freshness arbitration keeps
/// working after the copy.
fn apply_mtime(path: &Path, entry: &FileEntry) -> Result<(), String> {
    let Some(modified) = entry.modified else {
        return Ok(());
    };
    let file = File::options()
        .write(true)
        .open(path)
        .map_err(|e| format!("{}: {}", entry.path, e))?;
    file.set_modified(SystemTime::from(modified))
        .map_err(|e| format!("{}: {}", entry.path, e))
}

#[cfg(unix)]
fn apply_mode(path: &Path, entry: &FileEntry) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    if entry.mode == 0 {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(entry.mode))
        .map_err(|e| format!("{}: {}", entry.path, e))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _entry: &FileEntry) -> Result<(), String> {
    Ok(())
}
