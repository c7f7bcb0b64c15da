//! Pending-request correlation state.
//!
//! Tracks, per client, the calls that were written to the transport but have
//! not yet received a CALLRESULT or CALLERROR. The table is sharded by
//! client id so contention on one busy charge point never blocks another.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

/// Metadata of an in-flight call: its action and the payload it carried,
/// kept so the matching response can be decoded against the right schema.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub action: String,
    pub payload: Value,
}

/// Per-client shard of the pending table.
#[derive(Debug, Default)]
pub struct ClientState {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl ClientState {
    /// Record an in-flight call. Duplicate unique ids are an internal error;
    /// the first entry wins.
    pub fn add_pending_request(&self, unique_id: &str, request: PendingRequest) {
        let mut pending = self.pending.lock();
        if pending.contains_key(unique_id) {
            error!(unique_id, "duplicate pending request, keeping the first entry");
            return;
        }
        pending.insert(unique_id.to_string(), request);
    }

    pub fn get_pending_request(&self, unique_id: &str) -> Option<PendingRequest> {
        self.pending.lock().get(unique_id).cloned()
    }

    /// Removing an absent id is a no-op.
    pub fn delete_pending_request(&self, unique_id: &str) {
        self.pending.lock().remove(unique_id);
    }

    pub fn clear_pending_requests(&self) {
        self.pending.lock().clear();
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

/// Server-wide pending table: client id → [`ClientState`], created lazily
/// and dropped on disconnect cleanup. Cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    clients: Arc<DashMap<String, Arc<ClientState>>>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard for a client, created on first reference.
    pub fn get_client_state(&self, client_id: &str) -> Arc<ClientState> {
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    pub fn add_pending_request(&self, client_id: &str, unique_id: &str, request: PendingRequest) {
        self.get_client_state(client_id)
            .add_pending_request(unique_id, request);
    }

    /// Lookup without creating a shard.
    pub fn get_pending_request(&self, client_id: &str, unique_id: &str) -> Option<PendingRequest> {
        self.clients
            .get(client_id)
            .and_then(|state| state.get_pending_request(unique_id))
    }

    pub fn delete_pending_request(&self, client_id: &str, unique_id: &str) {
        if let Some(state) = self.clients.get(client_id) {
            state.delete_pending_request(unique_id);
        }
    }

    pub fn has_pending_request(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|state| state.has_pending_requests())
    }

    /// Drop every correlation for a client, e.g. on disconnect.
    pub fn clear_client(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    pub fn clear_all(&self) {
        self.clients.clear();
    }
}
