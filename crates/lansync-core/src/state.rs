//! Shared per-node state: the file index, peer list, and suppression flag.
//!
//! One `SyncState` lives behind an `Arc` and is shared by the HTTP server,
//! the filesystem watcher, and the reconciler. All interior mutability goes
//! through a single `RwLock`; every public method takes `&self` and holds
//! the lock only for map access, never across I/O.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::protocol::{FileEntry, FileUpdate};
use crate::scan::{scan_dir, ScanError};

/// Node-wide shared state.
///
/// The two index maps are rebuilt together from a fresh scan and always
/// describe the same snapshot: `paths` keys every entry by relative path,
/// `hashes` maps each content fingerprint back to one of the paths that
/// holds it.
pub struct SyncState {
    directory: PathBuf,
    passcode: String,
    port: u16,
    inner: RwLock<Inner>,
}

struct Inner {
    paths: HashMap<String, FileEntry>,
    hashes: HashMap<u64, String>,
    last_modified: DateTime<Utc>,
    peers: Vec<SocketAddr>,
    /// Depth of in-flight local write operations; watcher events are
    /// ignored while this is non-zero.
    updating: u32,
}

/// Keeps watcher suppression active while a sync-originated write is in
/// flight. Dropping the guard re-enables change detection.
#[must_use = "suppression ends as soon as the guard is dropped"]
pub struct UpdateGuard<'a> {
    state: &'a SyncState,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.state.write_inner();
        inner.updating = inner.updating.saturating_sub(1);
    }
}

impl SyncState {
    pub fn new(directory: PathBuf, passcode: String, port: u16) -> Self {
        Self {
            directory,
            passcode,
            port,
            inner: RwLock::new(Inner {
                paths: HashMap::new(),
                hashes: HashMap::new(),
                last_modified: DateTime::UNIX_EPOCH,
                peers: Vec::new(),
                updating: 0,
            }),
        }
    }

    /// Root of the synchronized tree.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Shared secret that identifies the sync group on the LAN.
    pub fn passcode(&self) -> &str {
        &self.passcode
    }

    /// Port the node's own HTTP endpoint listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Rescan the tree and atomically replace both index maps.
    ///
    /// The scan runs without holding the lock, so readers keep seeing the
    /// previous snapshot until the swap. Returns the number of indexed
    /// entries.
    ///
    /// `last_modified` is the maximum over every entry's mtime plus the
    /// root directory's own, so deleting a file raises it (the parent
    /// directory is touched) and the node rightly counts as fresher than
    /// peers still holding that file. A completely empty tree reports the
    /// epoch instead: a node that has nothing yet must never outrank peers
    /// that do.
    pub fn rebuild_index(&self) -> Result<usize, ScanError> {
        let entries = scan_dir(&self.directory)?;

        let mut paths = HashMap::with_capacity(entries.len());
        let mut hashes = HashMap::with_capacity(entries.len());
        let mut last_modified = DateTime::UNIX_EPOCH;
        for entry in entries {
            if let Some(modified) = entry.modified {
                last_modified = last_modified.max(modified);
            }
            hashes.insert(entry.hash, entry.path.clone());
            paths.insert(entry.path.clone(), entry);
        }

        if paths.is_empty() {
            last_modified = DateTime::UNIX_EPOCH;
        } else if let Ok(root_modified) = fs::metadata(&self.directory).and_then(|m| m.modified()) {
            last_modified = last_modified.max(root_modified.into());
        }

        let count = paths.len();
        let mut inner = self.write_inner();
        inner.paths = paths;
        inner.hashes = hashes;
        inner.last_modified = last_modified;
        Ok(count)
    }

    /// Manifest for `GET /list`: content-free entries keyed by fingerprint.
    pub fn manifest(&self) -> FileUpdate {
        let inner = self.read_inner();
        let hashes = inner
            .hashes
            .iter()
            .filter_map(|(hash, path)| {
                inner
                    .paths
                    .get(path)
                    .map(|entry| (*hash, entry.without_content()))
            })
            .collect();
        FileUpdate {
            hashes,
            last_modified: inner.last_modified,
        }
    }

    /// Clone of both index maps, for diff planning.
    pub fn index_snapshot(&self) -> (HashMap<String, FileEntry>, HashMap<u64, String>) {
        let inner = self.read_inner();
        (inner.paths.clone(), inner.hashes.clone())
    }

    /// Indexed entry at `path`, if any.
    pub fn entry(&self, path: &str) -> Option<FileEntry> {
        self.read_inner().paths.get(path).cloned()
    }

    /// Local path currently holding content with this fingerprint.
    pub fn path_for_hash(&self, hash: u64) -> Option<String> {
        self.read_inner().hashes.get(&hash).cloned()
    }

    /// Freshest modification time in the tree, directories included.
    /// The epoch when the tree is empty.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.read_inner().last_modified
    }

    /// Mark the start of a sync-originated write; nests.
    pub fn begin_update(&self) -> UpdateGuard<'_> {
        self.write_inner().updating += 1;
        UpdateGuard { state: self }
    }

    /// True while any sync-originated write is in flight.
    pub fn is_updating(&self) -> bool {
        self.read_inner().updating > 0
    }

    /// Replace the known-peer list with the latest discovery round.
    pub fn set_peers(&self, peers: Vec<SocketAddr>) {
        self.write_inner().peers = peers;
    }

    /// Peers found by the most recent discovery round.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.read_inner().peers.clone()
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
