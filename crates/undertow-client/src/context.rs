//! Session-scoped wiring for the sync core.
//!
//! One [`ClientContext`] per logged-in session: it owns the store and API
//! handles and the outbox/sync-engine built over them. There is no
//! process-wide state anywhere in this workspace — construct the context
//! at login, drop it at logout, and everything it owns goes with it.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::RemoteApi;
use crate::connectivity::{Connectivity, spawn_reconnect_driver};
use crate::outbox::{Outbox, OutboxConfig};
use crate::session::{CollabSession, SessionError};
use crate::store::Store;
use crate::sync::SyncEngine;
use crate::transport::Transport;
use undertow_types::DocumentId;

/// Everything one client session needs, wired together.
pub struct ClientContext {
    store: Arc<dyn Store>,
    api: Arc<dyn RemoteApi>,
    outbox: Arc<Outbox>,
    sync: Arc<SyncEngine>,
    reconnect: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ClientContext {
    pub fn new(store: Arc<dyn Store>, api: Arc<dyn RemoteApi>) -> Self {
        Self::with_outbox_config(store, api, OutboxConfig::default())
    }

    pub fn with_outbox_config(
        store: Arc<dyn Store>,
        api: Arc<dyn RemoteApi>,
        outbox_config: OutboxConfig,
    ) -> Self {
        let outbox = Arc::new(Outbox::with_config(store.clone(), api.clone(), outbox_config));
        let sync = Arc::new(SyncEngine::new(store.clone(), api.clone()));
        Self {
            store,
            api,
            outbox,
            sync,
            reconnect: parking_lot::Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn api(&self) -> &Arc<dyn RemoteApi> {
        &self.api
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Start reacting to the platform's connectivity feed. Replaces any
    /// previous driver.
    pub fn watch_connectivity(&self, rx: watch::Receiver<Connectivity>) {
        let driver = spawn_reconnect_driver(rx, self.outbox.clone(), self.sync.clone());
        if let Some(old) = self.reconnect.lock().replace(driver) {
            old.abort();
        }
    }

    /// Open a collaboration session on one document.
    pub fn open_document(
        &self,
        document_id: DocumentId,
        transport: Arc<dyn Transport>,
    ) -> Result<CollabSession, SessionError> {
        CollabSession::join(document_id, transport)
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        if let Some(driver) = self.reconnect.lock().take() {
            driver.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
