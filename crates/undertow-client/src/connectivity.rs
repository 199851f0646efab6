//! Reaction to connectivity transitions.
//!
//! The network monitor itself is an external collaborator; it owns a
//! watch channel of [`Connectivity`] values. This module supplies the
//! reaction: on the offline→online edge — and only on that edge — drain
//! the outbox, then run a full sync pass. Going offline triggers nothing;
//! there is nothing useful to do about it here.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::outbox::Outbox;
use crate::sync::SyncEngine;

/// Reachability of the remote authority, as reported by the platform's
/// network monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Watch `rx` and react to every offline→online edge by flushing the
/// outbox and running a full sync.
///
/// Runs until the monitor's sender side is dropped. The returned handle
/// can be aborted to stop reacting earlier (e.g. at logout).
pub fn spawn_reconnect_driver(
    mut rx: watch::Receiver<Connectivity>,
    outbox: Arc<Outbox>,
    engine: Arc<SyncEngine>,
) -> tokio::task::JoinHandle<()> {
    // Baseline captured at wiring time, not at first poll — a transition
    // that lands before the task runs must still read as an edge.
    let mut previous = *rx.borrow_and_update();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            if previous == Connectivity::Offline && current == Connectivity::Online {
                info!("connectivity restored, draining outbox and syncing");
                if let Err(e) = outbox.flush_pending().await {
                    // Store trouble; the entries are still queued for the
                    // next edge or manual flush.
                    warn!(error = %e, "outbox flush after reconnect failed");
                }
                // Failures land in SyncStatus, observers see them there.
                engine.full_sync().await;
            }
            previous = current;
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
