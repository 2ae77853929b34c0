//! Diff planning: what one node should push to a peer.
//!
//! Sync is push-only. A node compares its own index against a peer's
//! manifest and produces a plan with two halves:
//!
//! * upserts, keyed by content: anything the peer lacks gets pushed, and
//!   content the peer already holds under another path is pushed without
//!   bytes so the peer can materialize it by local copy;
//! * deletes, keyed by path: peer paths with no local counterpart.
//!
//! Receivers apply upserts before deletes, so a rename never loses its
//! copy source. Planning is pure; loading file content is the caller's
//! job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::protocol::{FileEntry, FileUpdate};

/// One entry to upsert on the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PushItem {
    /// Content-free copy of the local index entry.
    pub entry: FileEntry,
    /// Whether the sender must load the file's bytes before sending.
    /// False for directories and for content the peer already holds.
    pub needs_content: bool,
}

/// Everything a node wants to change on one peer, sorted by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub pushes: Vec<PushItem>,
    pub deletes: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.pushes.is_empty() && self.deletes.is_empty()
    }
}

/// True when the peer's tree is strictly fresher than ours.
///
/// A node never pushes to a strictly fresher peer; it waits for that peer
/// to push instead. Equal timestamps do not block a push, so two nodes
/// that tie still converge.
pub fn peer_is_fresher(local_last_modified: DateTime<Utc>, peer: &FileUpdate) -> bool {
    peer.last_modified > local_last_modified
}

/// Plan the push that would bring `peer` in line with the local index.
pub fn plan_update(local_paths: &HashMap<String, FileEntry>, peer: &FileUpdate) -> SyncPlan {
    let mut peer_path_to_hash: HashMap<&str, u64> = HashMap::with_capacity(peer.hashes.len());
    let mut peer_holds_hash: HashMap<u64, &str> = HashMap::with_capacity(peer.hashes.len());
    for (hash, entry) in &peer.hashes {
        peer_path_to_hash.insert(entry.path.as_str(), *hash);
        peer_holds_hash.insert(*hash, entry.path.as_str());
    }

    let mut pushes = Vec::new();
    for (path, entry) in local_paths {
        if peer_path_to_hash.get(path.as_str()) == Some(&entry.hash) {
            continue;
        }
        let peer_has_bytes = peer_holds_hash.contains_key(&entry.hash);
        pushes.push(PushItem {
            entry: entry.without_content(),
            needs_content: !entry.is_dir && !peer_has_bytes,
        });
    }
    pushes.sort_by(|a, b| a.entry.path.cmp(&b.entry.path));

    let mut deletes: Vec<String> = peer
        .hashes
        .values()
        .filter(|entry| !local_paths.contains_key(&entry.path))
        .map(|entry| entry.path.clone())
        .collect();
    deletes.sort();
    deletes.dedup();

    SyncPlan { pushes, deletes }
}
