//! Transport seam between the messaging core and a concrete WebSocket server.
//!
//! The core never opens sockets itself: it drives an implementation of
//! [`Transport`] and reacts to the callbacks it installs on it. A production
//! implementation backed by tokio-tungstenite lives in [`crate::ws`]; tests
//! substitute a scripted mock.

use std::sync::Arc;

use thiserror::Error;

use crate::error::OcppError;

/// A connected peer. Implementations must yield a stable string id for the
/// lifetime of the connection.
pub trait Channel: Send + Sync {
    fn id(&self) -> &str;
}

/// Invoked when a new peer completes the handshake.
pub type NewClientHandler = Box<dyn Fn(Arc<dyn Channel>) + Send + Sync>;

/// Invoked when a peer's connection is torn down.
pub type DisconnectedClientHandler = Box<dyn Fn(Arc<dyn Channel>) + Send + Sync>;

/// Invoked for every raw frame received from a peer. The returned error, if
/// any, is the core's verdict on the frame; the transport may log it.
pub type TransportMessageHandler =
    Box<dyn Fn(Arc<dyn Channel>, &[u8]) -> Result<(), OcppError> + Send + Sync>;

/// Server-side message transport consumed by the central system.
pub trait Transport: Send + Sync {
    /// Start listening on the given port and URL path. Callbacks must be
    /// installed before this is called.
    fn start(&self, port: u16, path: &str) -> Result<(), TransportError>;

    /// Stop accepting connections and tear down existing ones.
    fn stop(&self);

    /// Send one frame to the identified client.
    fn write(&self, client_id: &str, data: Vec<u8>) -> Result<(), TransportError>;

    fn set_new_client_handler(&self, handler: NewClientHandler);
    fn set_disconnected_client_handler(&self, handler: DisconnectedClientHandler);
    fn set_message_handler(&self, handler: TransportMessageHandler);
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("couldn't write to websocket. No socket with id {0} is open")]
    ClientNotConnected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("transport is already running")]
    AlreadyRunning,

    /// Opaque failure reported by a transport implementation.
    #[error("{0}")]
    Other(String),
}
