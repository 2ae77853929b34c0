//! lansync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to drive a full node in-process.

pub mod apply;
pub mod daemon;
pub mod discovery;
pub mod reconciler;
pub mod server;
pub mod watcher;

// Re-export key types for convenience
pub use daemon::{run, DaemonConfig};
pub use discovery::DiscoverySettings;
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
