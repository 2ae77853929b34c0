//! File watcher with debouncing for the synced tree.
//!
//! Uses notify-debouncer-mini for efficient file change detection. The
//! watcher only signals that something changed; the daemon decides when the
//! tree has gone quiet and rescans it wholesale, so events carry a path for
//! logging and suppression decisions rather than for incremental updates.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// File event from the watcher.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Path relative to the sync root
    pub path: String,
    /// Type of event
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File or directory was created or modified
    Modified,
    /// File or directory was deleted
    Deleted,
}

/// File watcher that monitors the sync root recursively.
pub struct FileWatcher {
    /// Sync root path
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// Receiver for file events
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Create a new watcher for the sync root.
    ///
    /// Uses a short debounce period to avoid rapid-fire events during saves;
    /// the daemon applies its own quiet window on top before triggering a
    /// sync.
    pub fn new(root: PathBuf) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let root = root.canonicalize().unwrap_or(root);

        // Create tokio channel for async event delivery
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root_clone = root.clone();

        // Create debouncer with callback (notify-debouncer-mini 0.6 API)
        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event, &root_clone) {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        // Watch the whole tree recursively
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Process a single debounced event, returning a FileEvent if relevant.
    fn process_event(event: &DebouncedEvent, root: &Path) -> Option<FileEvent> {
        let path = &event.path;

        // Get path relative to the sync root; events on the root itself
        // carry no path and are ignored.
        let relative = path.strip_prefix(root).ok()?;
        let relative_str = relative.to_str()?;
        if relative_str.is_empty() {
            return None;
        }

        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        debug!("File event: {:?} - {}", kind, relative_str);

        Some(FileEvent {
            path: relative_str.to_string(),
            kind,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    /// Get the watched root path.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
