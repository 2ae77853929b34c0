//! Pushing local state out to peers.
//!
//! One reconcile pass walks the current peer list. For each peer it fetches
//! the manifest, holds back if the peer's tree is strictly fresher, plans
//! the difference, loads whatever content the peer is missing, and POSTs
//! the batch. Unreachable or failing peers are logged and skipped; the next
//! pass retries them.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use lansync_core::protocol::{FileEntry, FileUpdate, Response};
use lansync_core::{peer_is_fresher, plan_update, safe_join, SyncPlan, SyncState};

/// What one reconcile pass did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ReconcileSummary {
    /// Peers a batch was pushed to.
    pub peers_updated: usize,
    /// Peers skipped because their tree was strictly fresher.
    pub peers_fresher: usize,
    /// Peers that could not be reached or reported failure.
    pub peers_failed: usize,
    pub upserts: usize,
    pub deletes: usize,
}

impl ReconcileSummary {
    pub fn had_effect(&self) -> bool {
        self.upserts + self.deletes > 0
    }
}

/// Reconcile against every known peer.
pub async fn sync_with_peers(state: &SyncState, client: &reqwest::Client) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();
    for peer in state.peers() {
        match sync_one(state, client, peer).await {
            Ok(PeerOutcome::Pushed { upserts, deletes }) => {
                summary.peers_updated += 1;
                summary.upserts += upserts;
                summary.deletes += deletes;
            }
            Ok(PeerOutcome::Fresher) => summary.peers_fresher += 1,
            Ok(PeerOutcome::InSync) => {}
            Err(e) => {
                warn!("sync with {} failed: {:#}", peer, e);
                summary.peers_failed += 1;
            }
        }
    }
    summary
}

enum PeerOutcome {
    /// A batch was sent and acknowledged.
    Pushed { upserts: usize, deletes: usize },
    /// The peer's tree is strictly fresher; it will push to us instead.
    Fresher,
    InSync,
}

async fn sync_one(
    state: &SyncState,
    client: &reqwest::Client,
    peer: SocketAddr,
) -> Result<PeerOutcome> {
    let manifest: FileUpdate = client
        .get(format!("http://{}/list", peer))
        .send()
        .await
        .context("manifest request failed")?
        .json()
        .await
        .context("manifest was not valid JSON")?;

    if peer_is_fresher(state.last_modified(), &manifest) {
        debug!("{} is fresher ({}), holding back", peer, manifest.last_modified);
        return Ok(PeerOutcome::Fresher);
    }

    let (paths, _) = state.index_snapshot();
    let plan = plan_update(&paths, &manifest);
    if plan.is_empty() {
        debug!("{} is already in sync", peer);
        return Ok(PeerOutcome::InSync);
    }

    let batch = build_wire_update(state.directory(), plan).await;
    if batch.is_empty() {
        // Everything planned vanished from disk before it could be read
        return Ok(PeerOutcome::InSync);
    }
    let upserts = batch.iter().filter(|e| !e.delete).count();
    let deletes = batch.len() - upserts;

    let response: Response = client
        .post(format!("http://{}/update", peer))
        .json(&batch)
        .send()
        .await
        .context("update request failed")?
        .json()
        .await
        .context("update response was not valid JSON")?;

    if !response.success {
        anyhow::bail!("peer rejected update: {}", response.message);
    }

    info!("pushed {} upserts, {} deletes to {}", upserts, deletes, peer);
    Ok(PeerOutcome::Pushed { upserts, deletes })
}

/// Turn a plan into the ordered batch that goes on the wire: upserts
/// first, then delete markers, both in the plan's path order.
///
/// Entries that need content are re-stated and loaded from disk here, so
/// the size and timestamp that go out reflect send time rather than the
/// last scan; a file that vanished or stopped being a regular file since
/// then is skipped and left for the next pass.
pub async fn build_wire_update(root: &Path, plan: SyncPlan) -> Vec<FileEntry> {
    let mut batch = Vec::with_capacity(plan.pushes.len() + plan.deletes.len());

    for item in plan.pushes {
        let mut entry = item.entry;
        if item.needs_content {
            let Some(abs) = safe_join(root, &entry.path) else {
                warn!("skipping {}: invalid path", entry.path);
                continue;
            };
            let meta = match tokio::fs::metadata(&abs).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    warn!("skipping {}: no longer a regular file", entry.path);
                    continue;
                }
                Err(e) => {
                    warn!("skipping {}: {}", entry.path, e);
                    continue;
                }
            };
            entry.size = meta.len();
            if let Ok(modified) = meta.modified() {
                entry.modified = Some(modified.into());
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                entry.mode = meta.permissions().mode() & 0o7777;
            }
            match tokio::fs::read(&abs).await {
                Ok(bytes) => entry.content = Some(bytes),
                Err(e) => {
                    warn!("skipping {}: {}", entry.path, e);
                    continue;
                }
            }
        }
        batch.push(entry);
    }

    for path in plan.deletes {
        batch.push(FileEntry::delete_marker(path));
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use lansync_core::hash::fingerprint_bytes;
    use lansync_core::PushItem;
    use std::fs;
    use tempfile::TempDir;

    fn push_item(path: &str, content: &[u8], needs_content: bool) -> PushItem {
        PushItem {
            entry: FileEntry {
                path: path.to_string(),
                size: content.len() as u64,
                mode: 0o644,
                modified: DateTime::from_timestamp(1_700_000_000, 0),
                is_dir: false,
                hash: fingerprint_bytes(content),
                content: None,
                delete: false,
            },
            needs_content,
        }
    }

    fn entry_for<'a>(batch: &'a [FileEntry], path: &str) -> &'a FileEntry {
        batch
            .iter()
            .find(|e| e.path == path)
            .unwrap_or_else(|| panic!("{} missing from batch", path))
    }

    #[tokio::test]
    async fn test_batch_serializes_as_a_json_array() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"bytes").unwrap();

        let plan = SyncPlan {
            pushes: vec![push_item("a.txt", b"bytes", true)],
            deletes: vec!["gone.txt".to_string()],
        };
        let batch = build_wire_update(dir.path(), plan).await;

        let value = serde_json::to_value(&batch).unwrap();
        let array = value.as_array().expect("wire batch must be an array");
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["p"], "a.txt");
        assert_eq!(array[1]["p"], "gone.txt");
    }

    #[tokio::test]
    async fn test_content_is_loaded_only_where_needed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("full.txt"), b"fresh payload").unwrap();
        fs::write(dir.path().join("rename.txt"), b"known payload").unwrap();

        let plan = SyncPlan {
            pushes: vec![
                push_item("full.txt", b"fresh payload", true),
                push_item("rename.txt", b"known payload", false),
            ],
            deletes: vec![],
        };
        let batch = build_wire_update(dir.path(), plan).await;

        assert_eq!(batch.len(), 2);
        let full = entry_for(&batch, "full.txt");
        assert_eq!(full.content.as_deref(), Some(&b"fresh payload"[..]));
        let rename = entry_for(&batch, "rename.txt");
        assert!(rename.content.is_none(), "peer already holds these bytes");
    }

    #[tokio::test]
    async fn test_entry_metadata_reflects_send_time() {
        // The file grew after the last scan; the outgoing entry carries the
        // bytes and size as they are now, not as the index remembers them.
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("grew.txt"), b"short plus a longer tail").unwrap();

        let plan = SyncPlan {
            pushes: vec![push_item("grew.txt", b"short", true)],
            deletes: vec![],
        };
        let batch = build_wire_update(dir.path(), plan).await;

        let entry = entry_for(&batch, "grew.txt");
        assert_eq!(entry.size, 24);
        assert_eq!(entry.content.as_deref(), Some(&b"short plus a longer tail"[..]));
    }

    #[tokio::test]
    async fn test_duplicate_content_keeps_both_entries() {
        // Two local paths with identical bytes are distinct batch entries;
        // one batch brings the peer both of them.
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one.txt"), b"twin").unwrap();
        fs::write(dir.path().join("two.txt"), b"twin").unwrap();

        let plan = SyncPlan {
            pushes: vec![
                push_item("one.txt", b"twin", true),
                push_item("two.txt", b"twin", true),
            ],
            deletes: vec![],
        };
        let batch = build_wire_update(dir.path(), plan).await;

        assert_eq!(batch.len(), 2);
        assert_eq!(entry_for(&batch, "one.txt").content.as_deref(), Some(&b"twin"[..]));
        assert_eq!(entry_for(&batch, "two.txt").content.as_deref(), Some(&b"twin"[..]));
    }

    #[tokio::test]
    async fn test_vanished_file_is_skipped() {
        let dir = TempDir::new().unwrap();

        let plan = SyncPlan {
            pushes: vec![push_item("gone.txt", b"missing", true)],
            deletes: vec!["stale.txt".to_string()],
        };
        let batch = build_wire_update(dir.path(), plan).await;

        // Only the delete marker made it
        assert_eq!(batch.len(), 1);
        assert!(batch[0].delete);
        assert_eq!(batch[0].path, "stale.txt");
    }

    #[tokio::test]
    async fn test_upserts_precede_deletes_in_the_batch() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("z.txt"), b"z").unwrap();

        let plan = SyncPlan {
            pushes: vec![push_item("z.txt", b"z", true)],
            deletes: vec!["a.txt".to_string(), "b.txt".to_string()],
        };
        let batch = build_wire_update(dir.path(), plan).await;

        assert_eq!(batch.len(), 3);
        assert!(!batch[0].delete, "upserts come first");
        assert!(batch[1].delete);
        assert!(batch[2].delete);
    }
}
