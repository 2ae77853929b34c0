//! lansync-core: the reconciliation core of lansync.
//!
//! Everything in this crate is synchronous and I/O-light: wire protocol
//! types, content fingerprinting, directory scanning, the shared per-node
//! state, and the pure diff planning that decides what one node pushes to
//! another. The daemon crate owns the network and the event loop.

pub mod diff;
pub mod hash;
pub mod protocol;
pub mod scan;
pub mod state;

// Re-export key types for convenience
pub use diff::{peer_is_fresher, plan_update, PushItem, SyncPlan};
pub use protocol::{FileEntry, FileUpdate, Response};
pub use scan::{safe_join, scan_dir, ScanError};
pub use state::SyncState;
