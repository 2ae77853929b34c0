//! Daemon wiring: configuration, the event loop, and sync scheduling.
//!
//! The loop owns three concerns: noticing when the tree has gone quiet
//! after a burst of local edits, noticing when new peers appear, and
//! running a reconcile pass when either happens. The HTTP endpoint and
//! peer discovery run as separate tasks against the same shared state.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lansync_core::SyncState;

use crate::discovery::{run_discovery, DiscoverySettings, DiscoverySocket};
use crate::reconciler::sync_with_peers;
use crate::server::{self, AppState};
use crate::watcher::{FileEvent, FileWatcher};

pub const DEFAULT_PORT: u16 = 8045;
pub const DEFAULT_PASSCODE: &str = "123";

/// Quiet window after the last file event before a sync is triggered.
pub const QUIET_WINDOW: Duration = Duration::from_secs(1);

/// How long `/update` keeps watcher suppression active after its last
/// write. Must comfortably exceed the watcher's debounce period.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Everything a node needs to run.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root of the synchronized tree.
    pub directory: PathBuf,
    /// Address the sync endpoint binds to.
    pub bind: IpAddr,
    /// Port the sync endpoint listens on; peers are probed on the same port.
    pub port: u16,
    /// Shared secret identifying the sync group.
    pub passcode: String,
    /// Static peer list. When non-empty, UDP discovery is disabled.
    pub peers: Vec<SocketAddr>,
    pub discovery: DiscoverySettings,
    pub quiet_window: Duration,
    pub settle: Duration,
}

impl DaemonConfig {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            passcode: DEFAULT_PASSCODE.to_string(),
            peers: Vec::new(),
            discovery: DiscoverySettings::default(),
            quiet_window: QUIET_WINDOW,
            settle: SETTLE_DELAY,
        }
    }
}

/// Decides when a burst of file events has gone quiet.
///
/// Every event restarts the window; the sync fires only once no event has
/// arrived for a full window. Starts pending so a freshly booted node
/// pushes its tree without waiting for an edit.
pub struct SyncScheduler {
    quiet_window: Duration,
    pending_since: Option<Instant>,
}

impl SyncScheduler {
    pub fn new_pending(quiet_window: Duration, now: Instant) -> Self {
        Self {
            quiet_window,
            pending_since: Some(now),
        }
    }

    /// Note a change; the quiet window restarts from `now`.
    pub fn note_event(&mut self, now: Instant) {
        self.pending_since = Some(now);
    }

    /// True exactly once per quiet burst: when a sync is pending and the
    /// window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending_since {
            Some(last) if now.duration_since(last) >= self.quiet_window => {
                self.pending_since = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }
}

/// Feed one watcher event into the scheduler, unless it is one of our own
/// sync-originated writes surfacing back through the filesystem. Returns
/// whether the event was accepted.
pub fn note_external_event(
    state: &SyncState,
    scheduler: &mut SyncScheduler,
    event: &FileEvent,
    now: Instant,
) -> bool {
    if state.is_updating() {
        debug!("ignoring {} (update in progress)", event.path);
        false
    } else {
        debug!("local change: {}", event.path);
        scheduler.note_event(now);
        true
    }
}

/// Run a node until `shutdown` fires.
pub async fn run(config: DaemonConfig, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let state = Arc::new(SyncState::new(
        config.directory.clone(),
        config.passcode.clone(),
        config.port,
    ));
    let count = state.rebuild_index().context("initial scan failed")?;
    info!(
        "indexed {} entries under {}",
        count,
        config.directory.display()
    );

    // A node that cannot serve its peers should not start at all.
    let addr = SocketAddr::new(config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind sync endpoint {}", addr))?;
    info!("sync endpoint listening on {}", addr);

    let app = AppState::new(Arc::clone(&state), config.settle);
    let mut server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, server::router(app))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    if config.peers.is_empty() {
        let mut settings = config.discovery.clone();
        settings.passcode = state.passcode().to_string();
        settings.http_port = state.port();

        let socket = DiscoverySocket::bind(&settings).with_context(|| {
            format!("failed to bind discovery port {}", settings.discovery_port)
        })?;
        let discovery_state = Arc::clone(&state);
        let discovery_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_discovery(socket, discovery_state, settings, discovery_shutdown).await
            {
                error!("peer discovery stopped: {:#}", e);
            }
        });
    } else {
        info!("using static peer list: {:?}", config.peers);
        state.set_peers(config.peers.clone());
    }

    let mut watcher =
        FileWatcher::new(config.directory.clone()).context("failed to start file watcher")?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build sync client")?;

    let mut scheduler = SyncScheduler::new_pending(config.quiet_window, Instant::now());
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_peers = state.peers();

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                note_external_event(&state, &mut scheduler, &event, Instant::now());
            }

            _ = ticker.tick() => {
                let now = Instant::now();

                let peers = state.peers();
                if peers != last_peers {
                    if peers.iter().any(|p| !last_peers.contains(p)) {
                        debug!("new peers appeared, scheduling a push");
                        scheduler.note_event(now);
                    }
                    last_peers = peers;
                }

                if scheduler.take_due(now) {
                    if state.is_updating() {
                        // A remote batch is mid-apply; rescanning now would
                        // index a half-written tree. Go again after it settles.
                        scheduler.note_event(now);
                        continue;
                    }
                    match state.rebuild_index() {
                        Ok(count) => {
                            debug!("reindexed {} entries", count);
                            let summary = sync_with_peers(&state, &client).await;
                            if summary.had_effect() {
                                info!(
                                    "synced {} upserts, {} deletes to {} peer(s)",
                                    summary.upserts, summary.deletes, summary.peers_updated
                                );
                            }
                        }
                        Err(e) => {
                            warn!("rescan failed, will retry: {}", e);
                            scheduler.note_event(now);
                        }
                    }
                }
            }

            _ = shutdown.changed() => break,
        }
    }

    info!("shutting down");
    server_task.await.context("server task panicked")??;
    Ok(())
}
