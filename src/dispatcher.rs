//! Outbound request dispatcher for the central system.
//!
//! Owns the per-client queues and enforces the one-outstanding-request rule:
//! each client moves through `Idle → Sending → AwaitingReply`, and the next
//! bundle is only written once the previous one was answered (or failed
//! terminally). Writes to distinct clients proceed independently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{ErrorCode, OcppError, OcppjError};
use crate::message::RequestBundle;
use crate::queue::RequestQueue;
use crate::state::{PendingRequest, ServerState};
use crate::transport::Transport;

/// Send state of one client.
enum SendState {
    /// Nothing in flight; a non-empty queue may be drained.
    Idle,
    /// The head bundle with this unique id is being handed to the transport.
    Sending(String),
    /// The head bundle was written; waiting for its CALLRESULT or CALLERROR.
    AwaitingReply(String),
}

struct ClientContext {
    queue: Arc<RequestQueue>,
    state: Mutex<SendState>,
}

impl ClientContext {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(RequestQueue::new(capacity)),
            state: Mutex::new(SendState::Idle),
        }
    }
}

/// Invoked when a queued request is dropped because its transport write
/// failed: `(client_id, unique_id, action, error)`.
pub type RequestCanceledHandler = Arc<dyn Fn(&str, &str, &str, &OcppError) + Send + Sync>;

/// Multi-client dispatcher. All methods are safe to call from any task.
pub struct ServerDispatcher {
    clients: DashMap<String, Arc<ClientContext>>,
    pending: ServerState,
    transport: Arc<dyn Transport>,
    running: AtomicBool,
    queue_capacity: usize,
    on_request_canceled: RwLock<Option<RequestCanceledHandler>>,
}

impl ServerDispatcher {
    pub fn new(transport: Arc<dyn Transport>, pending: ServerState, queue_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            pending,
            transport,
            running: AtomicBool::new(false),
            queue_capacity,
            on_request_canceled: RwLock::new(None),
        }
    }

    /// Begin accepting work.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Reject subsequent `send_request`s. In-flight writes are not canceled
    /// and queued bundles are not drained further.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register the callback fired when a write failure drops a queue head.
    pub fn set_request_canceled_handler(
        &self,
        handler: impl Fn(&str, &str, &str, &OcppError) + Send + Sync + 'static,
    ) {
        *self.on_request_canceled.write() = Some(Arc::new(handler));
    }

    /// Ensure a queue exists for the client.
    pub fn create_client(&self, client_id: &str) {
        self.context(client_id);
    }

    /// Drop the client's queue and pending correlations.
    pub fn delete_client(&self, client_id: &str) {
        self.clients.remove(client_id);
        self.pending.clear_client(client_id);
    }

    pub fn has_client(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// The client's queue, for inspection by tests and external watchers.
    pub fn queue(&self, client_id: &str) -> Option<Arc<RequestQueue>> {
        self.clients.get(client_id).map(|ctx| ctx.queue.clone())
    }

    /// Enqueue a bundle and drain the client's queue if it is idle. A full
    /// queue fails without side effects; the write itself happens after this
    /// returns successfully (on this task if the client was idle, otherwise
    /// on the task that completes the in-flight request).
    pub fn send_request(&self, client_id: &str, bundle: RequestBundle) -> Result<(), OcppjError> {
        if !self.is_running() {
            return Err(OcppjError::NotStarted);
        }
        let ctx = self.context(client_id);
        ctx.queue.push(bundle)?;
        self.drain(client_id, &ctx);
        Ok(())
    }

    /// Called once a CALLRESULT or CALLERROR arrived for the client's
    /// in-flight request: pops the head and tries the next bundle.
    pub fn complete_request(&self, client_id: &str, unique_id: &str) {
        let Some(ctx) = self.clients.get(client_id).map(|e| e.value().clone()) else {
            warn!(client_id, "completion for unknown client");
            return;
        };
        let resume = {
            let mut state = ctx.state.lock();
            let awaiting = matches!(&*state, SendState::AwaitingReply(id) if id == unique_id);
            let sending = matches!(&*state, SendState::Sending(id) if id == unique_id);
            if !awaiting && !sending {
                warn!(client_id, unique_id, "completion does not match the in-flight request");
                return;
            }
            ctx.queue.pop();
            *state = SendState::Idle;
            // If the reply raced the write call, the writing task observes
            // the transition and continues the drain itself.
            awaiting
        };
        if resume {
            self.drain(client_id, &ctx);
        }
    }

    fn context(&self, client_id: &str) -> Arc<ClientContext> {
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(ClientContext::new(self.queue_capacity)))
            .clone()
    }

    /// Advance the client's state machine until a write is in flight or the
    /// queue is exhausted. The transport write happens outside the state
    /// lock; the `Sending` marker excludes concurrent writers.
    fn drain(&self, client_id: &str, ctx: &Arc<ClientContext>) {
        loop {
            let head = {
                let mut state = ctx.state.lock();
                if !self.is_running() || !matches!(*state, SendState::Idle) {
                    return;
                }
                let Some(head) = ctx.queue.peek() else {
                    return;
                };
                *state = SendState::Sending(head.call.unique_id.clone());
                head
            };

            let unique_id = head.call.unique_id.clone();
            let action = head.call.action.clone();

            // The request is pending from the moment the bytes are handed to
            // the transport, so a reply can be correlated even if it arrives
            // before the write call returns.
            self.pending.add_pending_request(
                client_id,
                &unique_id,
                PendingRequest {
                    action: action.clone(),
                    payload: head.call.payload.clone(),
                },
            );

            match self.transport.write(client_id, head.data) {
                Ok(()) => {
                    let mut state = ctx.state.lock();
                    if matches!(&*state, SendState::Sending(id) if *id == unique_id) {
                        debug!(client_id, %unique_id, %action, "request written, awaiting reply");
                        *state = SendState::AwaitingReply(unique_id);
                        return;
                    }
                    // Completed while the write was in flight: head already
                    // popped, try the next bundle.
                }
                Err(err) => {
                    warn!(client_id, %unique_id, %err, "transport write failed, dropping request");
                    self.pending.delete_pending_request(client_id, &unique_id);
                    {
                        let mut state = ctx.state.lock();
                        ctx.queue.pop();
                        *state = SendState::Idle;
                    }
                    let wire_err =
                        OcppError::new(ErrorCode::GenericError, err.to_string(), unique_id.clone());
                    let handler = self.on_request_canceled.read().clone();
                    if let Some(handler) = handler {
                        handler(client_id, &unique_id, &action, &wire_err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Call;
    use crate::queue::DEFAULT_QUEUE_CAPACITY;
    use crate::transport::{
        DisconnectedClientHandler, NewClientHandler, TransportError, TransportMessageHandler,
    };
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    /// Transport stub recording writes; optionally failing them.
    #[derive(Default)]
    struct StubTransport {
        writes: PlMutex<Vec<(String, Vec<u8>)>>,
        fail_writes: AtomicBool,
    }

    impl Transport for StubTransport {
        fn start(&self, _port: u16, _path: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn stop(&self) {}
        fn write(&self, client_id: &str, data: Vec<u8>) -> Result<(), TransportError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TransportError::Other("networkError".to_string()));
            }
            self.writes.lock().push((client_id.to_string(), data));
            Ok(())
        }
        fn set_new_client_handler(&self, _handler: NewClientHandler) {}
        fn set_disconnected_client_handler(&self, _handler: DisconnectedClientHandler) {}
        fn set_message_handler(&self, _handler: TransportMessageHandler) {}
    }

    fn bundle(id: &str) -> RequestBundle {
        let call = Call::new(id, "MockFeature", json!({"mockValue": id}));
        let data = call.to_bytes().unwrap();
        RequestBundle { call, data }
    }

    fn dispatcher() -> (Arc<StubTransport>, ServerDispatcher, ServerState) {
        let transport = Arc::new(StubTransport::default());
        let state = ServerState::new();
        let dispatcher = ServerDispatcher::new(
            transport.clone(),
            state.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        (transport, dispatcher, state)
    }

    #[test]
    fn test_not_started() {
        let (_, dispatcher, _) = dispatcher();
        let err = dispatcher.send_request("cp1", bundle("1")).unwrap_err();
        assert!(matches!(err, OcppjError::NotStarted));
    }

    #[test]
    fn test_one_write_until_completion() {
        let (transport, dispatcher, state) = dispatcher();
        dispatcher.start();
        for i in 0..3 {
            dispatcher.send_request("cp1", bundle(&i.to_string())).unwrap();
        }

        // Only the head was written; all bundles are still queued.
        assert_eq!(transport.writes.lock().len(), 1);
        assert_eq!(dispatcher.queue("cp1").unwrap().len(), 3);
        assert!(state.get_pending_request("cp1", "0").is_some());
        assert!(state.get_pending_request("cp1", "1").is_none());

        // Endpoint resolves the pending entry, then completes.
        state.delete_pending_request("cp1", "0");
        dispatcher.complete_request("cp1", "0");
        assert_eq!(transport.writes.lock().len(), 2);
        assert_eq!(dispatcher.queue("cp1").unwrap().len(), 2);
        assert!(state.get_pending_request("cp1", "1").is_some());
    }

    #[test]
    fn test_write_failure_drops_head_and_fires_handler() {
        let (transport, dispatcher, state) = dispatcher();
        let canceled: Arc<PlMutex<Vec<(String, String, String, String)>>> = Default::default();
        let seen = canceled.clone();
        dispatcher.set_request_canceled_handler(move |client, id, action, err| {
            seen.lock().push((
                client.to_string(),
                id.to_string(),
                action.to_string(),
                err.to_string(),
            ));
        });
        dispatcher.start();
        transport.fail_writes.store(true, Ordering::SeqCst);

        dispatcher.send_request("cp1", bundle("1")).unwrap();

        assert!(dispatcher.queue("cp1").unwrap().is_empty());
        assert!(state.get_pending_request("cp1", "1").is_none());
        let canceled = canceled.lock();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].0, "cp1");
        assert_eq!(canceled[0].1, "1");
        assert_eq!(canceled[0].2, "MockFeature");
        assert_eq!(canceled[0].3, "ocpp message (1): GenericError - networkError");
    }

    #[test]
    fn test_clients_drain_independently() {
        let (transport, dispatcher, _) = dispatcher();
        dispatcher.start();
        dispatcher.send_request("cp1", bundle("a1")).unwrap();
        dispatcher.send_request("cp2", bundle("b1")).unwrap();

        let writes = transport.writes.lock();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, "cp1");
        assert_eq!(writes[1].0, "cp2");
    }

    #[test]
    fn test_delete_client_clears_queue_and_pending() {
        let (_, dispatcher, state) = dispatcher();
        dispatcher.start();
        dispatcher.send_request("cp1", bundle("1")).unwrap();

        dispatcher.delete_client("cp1");
        assert!(!dispatcher.has_client("cp1"));
        assert!(state.get_pending_request("cp1", "1").is_none());
    }

    #[test]
    fn test_stop_rejects_new_requests() {
        let (_, dispatcher, _) = dispatcher();
        dispatcher.start();
        dispatcher.stop();
        let err = dispatcher.send_request("cp1", bundle("1")).unwrap_err();
        assert!(matches!(err, OcppjError::NotStarted));
    }
}
