//! HTTP endpoint every node exposes to its peers.
//!
//! Three routes, all JSON:
//! - `HEAD /` answers liveness probes from peer discovery
//! - `GET /list` returns the node's manifest
//! - `POST /update` applies an ordered array of upserts and deletes
//!
//! `/update` always answers `200 OK`; success or failure travels in the
//! response body, in keeping with the wire protocol.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, head, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lansync_core::protocol::{FileEntry, FileUpdate, Response};
use lansync_core::SyncState;

use crate::apply::apply_update;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    state: Arc<SyncState>,
    /// How long to keep watcher suppression active after the last write,
    /// covering the watcher's debounce flush.
    settle: Duration,
}

impl AppState {
    pub fn new(state: Arc<SyncState>, settle: Duration) -> Self {
        Self { state, settle }
    }
}

/// Build the sync endpoint router.
pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/", head(head_ok))
        .route("/list", get(get_list))
        .route("/update", post(post_update))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn head_ok() -> StatusCode {
    StatusCode::OK
}

async fn get_list(State(app): State<AppState>) -> Json<FileUpdate> {
    Json(app.state.manifest())
}

async fn post_update(State(app): State<AppState>, body: Bytes) -> Json<Response> {
    let entries: Vec<FileEntry> = match serde_json::from_slice(&body) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("rejected update batch: {}", e);
            return Json(Response::error(e.to_string()));
        }
    };

    // Our own writes must not look like local edits, so the watcher is
    // suppressed from before the first write until after the settle delay.
    let _guard = app.state.begin_update();

    let state = Arc::clone(&app.state);
    let applied = tokio::task::spawn_blocking(move || {
        let mut report = apply_update(&state, &entries);
        if let Err(e) = state.rebuild_index() {
            report.errors.push(format!("index rebuild failed: {}", e));
        }
        report
    })
    .await;

    let response = match applied {
        Ok(report) => {
            if report.is_success() {
                info!(
                    "applied update: {} upserts, {} deletes",
                    report.upserts, report.deletes
                );
            } else {
                warn!("update applied with errors: {}", report.message());
            }
            Response {
                success: report.is_success(),
                message: report.message(),
            }
        }
        Err(e) => Response::error(format!("update task failed: {}", e)),
    };

    // Hold suppression until the debounced watcher has flushed the events
    // our writes produced.
    tokio::time::sleep(app.settle).await;

    Json(response)
}
