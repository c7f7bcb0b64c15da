//! Shared fixtures: a scripted mock transport, a mock feature profile, and
//! serialization helpers mirroring the shapes a charge point would send.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Serialize, Serializer};

use ek_csms::transport::{
    DisconnectedClientHandler, NewClientHandler, TransportMessageHandler,
};
use ek_csms::{
    set_message_validation, CentralSystem, Channel, Feature, FieldRule, OcppError, PayloadSchema,
    Profile, Request, Response, ServerConfig, Transport, TransportError,
};

pub const MOCK_FEATURE_NAME: &str = "MockFeature";

/// The global validation switch makes concurrently running tests interfere;
/// every test in a binary takes this lock first.
static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Disables message validation for the current scope.
pub struct ValidationOff;

impl ValidationOff {
    pub fn new() -> Self {
        set_message_validation(false);
        Self
    }
}

impl Drop for ValidationOff {
    fn drop(&mut self) {
        set_message_validation(true);
    }
}

pub struct MockChannel {
    id: String,
}

impl MockChannel {
    pub fn new(id: &str) -> Arc<dyn Channel> {
        Arc::new(Self { id: id.to_string() })
    }
}

impl Channel for MockChannel {
    fn id(&self) -> &str {
        &self.id
    }
}

type WriteResult = Box<dyn Fn(&str, &[u8]) -> Result<(), TransportError> + Send>;
type WriteHook = Box<dyn Fn(&str, &[u8]) + Send>;

#[derive(Default)]
struct MockInner {
    started: AtomicBool,
    writes: Mutex<Vec<(String, Vec<u8>)>>,
    write_result: Mutex<Option<WriteResult>>,
    write_hook: Mutex<Option<WriteHook>>,
    new_client: Mutex<Option<NewClientHandler>>,
    disconnected: Mutex<Option<DisconnectedClientHandler>>,
    message: Mutex<Option<TransportMessageHandler>>,
}

/// Transport double recording every write; the result of a write and a
/// during-write hook are scriptable, and inbound traffic is injected through
/// [`MockTransport::deliver`].
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// All writes so far, as `(client_id, frame)` strings.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.inner
            .writes
            .lock()
            .iter()
            .map(|(client, data)| (client.clone(), String::from_utf8_lossy(data).into_owned()))
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.inner.writes.lock().len()
    }

    pub fn last_write(&self) -> Option<(String, String)> {
        self.writes().pop()
    }

    /// Make subsequent writes fail with the given message.
    pub fn fail_writes_with(&self, message: &str) {
        let message = message.to_string();
        *self.inner.write_result.lock() =
            Some(Box::new(move |_, _| Err(TransportError::Other(message.clone()))));
    }

    /// Observe each write while it is in progress (before its result is
    /// reported back to the dispatcher).
    pub fn on_write(&self, hook: impl Fn(&str, &[u8]) + Send + 'static) {
        *self.inner.write_hook.lock() = Some(Box::new(hook));
    }

    /// Inject an inbound frame, as the websocket layer would.
    pub fn deliver(&self, channel: Arc<dyn Channel>, data: &[u8]) -> Result<(), OcppError> {
        let handler = self.inner.message.lock();
        let handler = handler.as_ref().expect("message handler not installed");
        handler(channel, data)
    }

    /// Simulate a charge point connecting.
    pub fn connect(&self, channel: Arc<dyn Channel>) {
        let handler = self.inner.new_client.lock();
        if let Some(handler) = handler.as_ref() {
            handler(channel);
        }
    }

    /// Simulate a charge point disconnecting.
    pub fn disconnect(&self, channel: Arc<dyn Channel>) {
        let handler = self.inner.disconnected.lock();
        if let Some(handler) = handler.as_ref() {
            handler(channel);
        }
    }
}

impl Transport for MockTransport {
    fn start(&self, _port: u16, _path: &str) -> Result<(), TransportError> {
        self.inner.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
    }

    fn write(&self, client_id: &str, data: Vec<u8>) -> Result<(), TransportError> {
        self.inner
            .writes
            .lock()
            .push((client_id.to_string(), data.clone()));
        if let Some(hook) = self.inner.write_hook.lock().as_ref() {
            hook(client_id, &data);
        }
        match self.inner.write_result.lock().as_ref() {
            Some(result) => result(client_id, &data),
            None => Ok(()),
        }
    }

    fn set_new_client_handler(&self, handler: NewClientHandler) {
        *self.inner.new_client.lock() = Some(handler);
    }

    fn set_disconnected_client_handler(&self, handler: DisconnectedClientHandler) {
        *self.inner.disconnected.lock() = Some(handler);
    }

    fn set_message_handler(&self, handler: TransportMessageHandler) {
        *self.inner.message.lock() = Some(handler);
    }
}

/// A value whose serialization always fails, for exercising the
/// JSON-encode error paths.
#[derive(Debug)]
pub struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("unsupported value"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRequest {
    pub mock_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_any: Option<Unserializable>,
}

impl MockRequest {
    pub fn new(value: &str) -> Self {
        Self {
            mock_value: value.to_string(),
            mock_any: None,
        }
    }
}

impl Request for MockRequest {
    fn feature_name(&self) -> &str {
        MOCK_FEATURE_NAME
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    pub mock_value: String,
}

impl MockResponse {
    pub fn new(value: &str) -> Self {
        Self {
            mock_value: value.to_string(),
        }
    }
}

impl Response for MockResponse {
    fn feature_name(&self) -> &str {
        MOCK_FEATURE_NAME
    }
}

/// A response whose feature is not part of any enabled profile.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockUnsupportedResponse {
    pub mock_value: String,
}

impl Response for MockUnsupportedResponse {
    fn feature_name(&self) -> &str {
        "UnsupportedFeature"
    }
}

/// The mock feature: request requires `mockValue`; the response additionally
/// constrains it to at least 5 characters.
pub fn mock_profile() -> Profile {
    Profile::new("mock").with_feature(Feature::new(
        MOCK_FEATURE_NAME,
        PayloadSchema::new().field(FieldRule::string("mockValue").required()),
        PayloadSchema::new().field(FieldRule::string("mockValue").required().min(5.0)),
    ))
}

pub fn setup() -> (Arc<CentralSystem>, MockTransport) {
    setup_with(ServerConfig::default())
}

pub fn setup_with(config: ServerConfig) -> (Arc<CentralSystem>, MockTransport) {
    let transport = MockTransport::new();
    let csms = CentralSystem::with_config(Arc::new(transport.clone()), config);
    csms.add_profile(mock_profile());
    (csms, transport)
}
