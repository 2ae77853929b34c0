//! Directory scanning: turn a sync root into index entries.
//!
//! A scan walks the tree under the root and produces one [`FileEntry`] per
//! file and directory, with tree-relative `/`-separated paths. The root
//! itself is not an entry. Content is never loaded here; files are
//! fingerprinted by streaming them through the hasher.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::hash::{fingerprint_path, fingerprint_reader};
use crate::protocol::FileEntry;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path is not valid UTF-8: {path}")]
    NonUtf8Path { path: PathBuf },

    #[error("path escapes the sync root: {path}")]
    OutsideRoot { path: PathBuf },
}

/// Walk `root` and build entries for everything under it.
///
/// Symlinks and other non-regular entries are skipped; a vanished file
/// mid-walk is an error, which callers treat as "rescan later".
pub fn scan_dir(root: &Path) -> Result<Vec<FileEntry>, ScanError> {
    let mut entries = Vec::new();

    for item in WalkDir::new(root).min_depth(1) {
        let item = item?;
        let file_type = item.file_type();
        if !file_type.is_file() && !file_type.is_dir() {
            tracing::debug!(path = %item.path().display(), "skipping non-regular entry");
            continue;
        }

        let path = relative_wire_path(root, item.path())?;
        let metadata = item.metadata()?;
        let modified = metadata.modified().map_err(|source| ScanError::Io {
            path: item.path().to_owned(),
            source,
        })?;

        let (size, hash) = if file_type.is_dir() {
            (0, fingerprint_path(&path))
        } else {
            let file = File::open(item.path()).map_err(|source| ScanError::Io {
                path: item.path().to_owned(),
                source,
            })?;
            let hash = fingerprint_reader(file).map_err(|source| ScanError::Io {
                path: item.path().to_owned(),
                source,
            })?;
            (metadata.len(), hash)
        };

        entries.push(FileEntry {
            path,
            size,
            mode: permission_bits(&metadata),
            modified: Some(modified.into()),
            is_dir: file_type.is_dir(),
            hash,
            content: None,
            delete: false,
        });
    }

    Ok(entries)
}

/// Resolve a wire path received from a peer to an absolute path under `root`.
///
/// Returns `None` for anything that would land outside the root: absolute
/// paths, `..` components, drive prefixes, or an empty path.
pub fn safe_join(root: &Path, wire_path: &str) -> Option<PathBuf> {
    if wire_path.is_empty() {
        return None;
    }
    let relative = Path::new(wire_path);
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(root.join(relative))
}

/// Relative `/`-separated path of `path` under `root`.
fn relative_wire_path(root: &Path, path: &Path) -> Result<String, ScanError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| ScanError::OutsideRoot {
            path: path.to_owned(),
        })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                parts.push(part.to_str().ok_or_else(|| ScanError::NonUtf8Path {
                    path: path.to_owned(),
                })?);
            }
            _ => {
                return Err(ScanError::OutsideRoot {
                    path: path.to_owned(),
                });
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &std::fs::Metadata) -> u32 {
    0
}
