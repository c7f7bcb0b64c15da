//! WebSocket server transport backed by tokio-tungstenite.
//!
//! Charge points connect to `ws://host:port/<base>/<chargePointId>`; the last
//! path segment becomes the stable channel id. Each connection gets a reader
//! task (feeding the installed message handler) and a writer task fed by an
//! unbounded channel, so [`Transport::write`] never blocks on the socket.
//!
//! [`Transport::start`] must be called from within a tokio runtime.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::transport::{
    Channel, DisconnectedClientHandler, NewClientHandler, Transport, TransportError,
    TransportMessageHandler,
};

struct WsChannel {
    id: String,
}

impl Channel for WsChannel {
    fn id(&self) -> &str {
        &self.id
    }
}

struct ClientSender {
    /// Connection generation, so a reconnect under the same id does not get
    /// unregistered by the stale connection's teardown.
    seq: u64,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Inner {
    clients: DashMap<String, ClientSender>,
    conn_seq: AtomicU64,
    new_client: RwLock<Option<NewClientHandler>>,
    disconnected: RwLock<Option<DisconnectedClientHandler>>,
    message: RwLock<Option<TransportMessageHandler>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Multi-client WebSocket server implementing [`Transport`].
#[derive(Clone, Default)]
pub struct WebSocketServer {
    inner: Arc<Inner>,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound address, available after a successful `start`. Useful when
    /// starting on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }
}

impl Transport for WebSocketServer {
    fn start(&self, port: u16, path: &str) -> Result<(), TransportError> {
        let mut shutdown_slot = self.inner.shutdown.lock();
        if shutdown_slot.is_some() {
            return Err(TransportError::AlreadyRunning);
        }

        let listener = std::net::TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        *self.inner.local_addr.lock() = listener.local_addr().ok();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *shutdown_slot = Some(shutdown_tx);

        let inner = self.inner.clone();
        let base = base_path(path);
        info!(port, path, "websocket server listening");
        tokio::spawn(accept_loop(inner, listener, shutdown_rx, base));
        Ok(())
    }

    fn stop(&self) {
        if let Some(shutdown) = self.inner.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        // Dropping the senders closes every connection's writer task.
        self.inner.clients.clear();
    }

    fn write(&self, client_id: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let Some(client) = self.inner.clients.get(client_id) else {
            return Err(TransportError::ClientNotConnected(client_id.to_string()));
        };
        let text = String::from_utf8_lossy(&data).into_owned();
        debug!(client_id, "sending: {text}");
        client
            .tx
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::ClientNotConnected(client_id.to_string()))
    }

    fn set_new_client_handler(&self, handler: NewClientHandler) {
        *self.inner.new_client.write() = Some(handler);
    }

    fn set_disconnected_client_handler(&self, handler: DisconnectedClientHandler) {
        *self.inner.disconnected.write() = Some(handler);
    }

    fn set_message_handler(&self, handler: TransportMessageHandler) {
        *self.inner.message.write() = Some(handler);
    }
}

async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    base: String,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("websocket server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let inner = inner.clone();
                    let base = base.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(inner, stream, peer, base, shutdown).await {
                            debug!(%peer, %err, "connection ended");
                        }
                    });
                }
                Err(err) => {
                    error!(%err, "accept failed");
                }
            }
        }
    }
}

async fn handle_connection(
    inner: Arc<Inner>,
    stream: TcpStream,
    peer: SocketAddr,
    base: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let mut request_path = String::new();
    let ws_stream = accept_hdr_async(stream, |req: &Request, mut resp: Response| {
        request_path = req.uri().path().to_string();
        // Echo the first offered subprotocol (e.g. ocpp1.6) back to the peer.
        if let Some(offered) = req
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
        {
            if let Ok(value) = HeaderValue::from_str(offered.trim()) {
                resp.headers_mut().insert(header::SEC_WEBSOCKET_PROTOCOL, value);
            }
        }
        Ok(resp)
    })
    .await
    .map_err(|err| TransportError::WebSocket(err.to_string()))?;

    let Some(client_id) = client_id_from_path(&base, &request_path) else {
        warn!(%peer, path = %request_path, "rejecting connection without a charge point id");
        return Ok(());
    };

    let seq = inner.conn_seq.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let pong_tx = tx.clone();
    inner
        .clients
        .insert(client_id.clone(), ClientSender { seq, tx });
    info!(%client_id, %peer, "charge point connected");

    let channel: Arc<dyn Channel> = Arc::new(WsChannel { id: client_id.clone() });
    {
        let handler = inner.new_client.read();
        if let Some(handler) = handler.as_ref() {
            handler(channel.clone());
        }
    }

    let (mut sink, mut source) = ws_stream.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!(%client_id, "received: {text}");
                    dispatch_message(&inner, &channel, text.as_bytes());
                }
                Some(Ok(Message::Binary(data))) => {
                    dispatch_message(&inner, &channel, &data);
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = pong_tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%client_id, %err, "websocket read error");
                    break;
                }
            }
        }
    }

    writer.abort();
    inner.clients.remove_if(&client_id, |_, sender| sender.seq == seq);
    info!(%client_id, "charge point disconnected");
    {
        let handler = inner.disconnected.read();
        if let Some(handler) = handler.as_ref() {
            handler(channel.clone());
        }
    }
    Ok(())
}

fn dispatch_message(inner: &Arc<Inner>, channel: &Arc<dyn Channel>, data: &[u8]) {
    let handler = inner.message.read();
    match handler.as_ref() {
        Some(handler) => {
            if let Err(err) = handler(channel.clone(), data) {
                // The endpoint already answered the peer; just log.
                warn!(client_id = channel.id(), %err, "inbound message rejected");
            }
        }
        None => warn!(client_id = channel.id(), "no message handler installed, dropping frame"),
    }
}

/// The static prefix of the configured path: `/ws` → `ws`, `/{ws}` → ``.
fn base_path(path: &str) -> String {
    let prefix = path.split('{').next().unwrap_or("");
    prefix.trim_matches('/').to_string()
}

/// Charge point id from a request path: everything beneath the base prefix.
fn client_id_from_path(base: &str, request_path: &str) -> Option<String> {
    let rel = request_path.trim_matches('/');
    let id = if base.is_empty() {
        rel
    } else {
        let rest = rel.strip_prefix(base)?;
        if rest.is_empty() { "" } else { rest.strip_prefix('/')? }
    };
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_path() {
        assert_eq!(base_path("/ws"), "ws");
        assert_eq!(base_path("/ws/"), "ws");
        assert_eq!(base_path("/{ws}"), "");
        assert_eq!(base_path("/steve/websocket/{id}"), "steve/websocket");
    }

    #[test]
    fn test_client_id_from_path() {
        assert_eq!(client_id_from_path("ws", "/ws/CP-1"), Some("CP-1".to_string()));
        assert_eq!(client_id_from_path("", "/CP-1"), Some("CP-1".to_string()));
        assert_eq!(
            client_id_from_path("steve/websocket", "/steve/websocket/CP-1"),
            Some("CP-1".to_string())
        );
        assert_eq!(client_id_from_path("ws", "/ws"), None);
        assert_eq!(client_id_from_path("ws", "/other/CP-1"), None);
        assert_eq!(client_id_from_path("", "/"), None);
    }
}
