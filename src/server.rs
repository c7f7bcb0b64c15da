//! Central-system endpoint: the façade the application talks to.
//!
//! Wires together the profile catalogue, the validation pipeline, the
//! dispatcher and the pending-request table, and installs itself on a
//! [`Transport`]. Outbound requests flow through `send_request` into the
//! per-client queue; inbound frames arrive through the transport message
//! callback and are classified, decoded and routed to the registered
//! handlers.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::ServerDispatcher;
use crate::error::{ErrorCode, OcppError, OcppjError};
use crate::message::{Call, CallError, CallResult, MessageType, RequestBundle};
use crate::profile::{Feature, Profile, Request, Response};
use crate::state::ServerState;
use crate::transport::{Channel, Transport, TransportError};
use crate::validation::{message_validation_enabled, validate_payload};

/// Handles an inbound CALL: `(channel, payload, unique_id, action)`.
pub type RequestHandler = Arc<dyn Fn(Arc<dyn Channel>, Value, &str, &str) + Send + Sync>;

/// Handles an inbound CALLRESULT: `(channel, payload, unique_id)`.
pub type ResponseHandler = Arc<dyn Fn(Arc<dyn Channel>, Value, &str) + Send + Sync>;

/// Handles an inbound CALLERROR: `(channel, error, details)`.
pub type ErrorHandler = Arc<dyn Fn(Arc<dyn Channel>, OcppError, Value) + Send + Sync>;

/// Handles a client connecting or disconnecting.
pub type ClientHandler = Arc<dyn Fn(Arc<dyn Channel>) + Send + Sync>;

/// Interception point for malformed inbound frames. Receives the error the
/// core derived, the raw message, and the outer array elements as far as
/// they could be parsed; may substitute its own error.
pub type InvalidMessageHook =
    Arc<dyn Fn(Arc<dyn Channel>, &OcppError, &str, &[Value]) -> Option<OcppError> + Send + Sync>;

/// The OCPP-J server endpoint speaking to many charge points.
pub struct CentralSystem {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<ServerDispatcher>,
    request_state: ServerState,
    profiles: RwLock<Vec<Profile>>,
    config: ServerConfig,

    new_client_handler: RwLock<Option<ClientHandler>>,
    disconnected_handler: RwLock<Option<ClientHandler>>,
    request_handler: RwLock<Option<RequestHandler>>,
    response_handler: RwLock<Option<ResponseHandler>>,
    error_handler: RwLock<Option<ErrorHandler>>,
    invalid_message_hook: RwLock<Option<InvalidMessageHook>>,
}

impl CentralSystem {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_config(transport, ServerConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: ServerConfig) -> Arc<Self> {
        let request_state = ServerState::new();
        let dispatcher = Arc::new(ServerDispatcher::new(
            transport.clone(),
            request_state.clone(),
            config.queue_capacity,
        ));
        Arc::new(Self {
            transport,
            dispatcher,
            request_state,
            profiles: RwLock::new(Vec::new()),
            config,
            new_client_handler: RwLock::new(None),
            disconnected_handler: RwLock::new(None),
            request_handler: RwLock::new(None),
            response_handler: RwLock::new(None),
            error_handler: RwLock::new(None),
            invalid_message_hook: RwLock::new(None),
        })
    }

    /// Enable a feature profile. Profiles are scanned in registration order.
    pub fn add_profile(&self, profile: Profile) {
        info!(profile = profile.name(), "profile enabled");
        self.profiles.write().push(profile);
    }

    pub fn dispatcher(&self) -> Arc<ServerDispatcher> {
        self.dispatcher.clone()
    }

    /// The pending-request table, exposed so an external watcher can expire
    /// entries (`delete_pending_request` + `complete_request`).
    pub fn request_state(&self) -> ServerState {
        self.request_state.clone()
    }

    // Handler registration. Slots are last-writer-wins; unset slots are
    // no-ops on the inbound path.

    pub fn set_new_client_handler(&self, handler: impl Fn(Arc<dyn Channel>) + Send + Sync + 'static) {
        *self.new_client_handler.write() = Some(Arc::new(handler));
    }

    pub fn set_disconnected_client_handler(
        &self,
        handler: impl Fn(Arc<dyn Channel>) + Send + Sync + 'static,
    ) {
        *self.disconnected_handler.write() = Some(Arc::new(handler));
    }

    pub fn set_request_handler(
        &self,
        handler: impl Fn(Arc<dyn Channel>, Value, &str, &str) + Send + Sync + 'static,
    ) {
        *self.request_handler.write() = Some(Arc::new(handler));
    }

    pub fn set_response_handler(
        &self,
        handler: impl Fn(Arc<dyn Channel>, Value, &str) + Send + Sync + 'static,
    ) {
        *self.response_handler.write() = Some(Arc::new(handler));
    }

    pub fn set_error_handler(
        &self,
        handler: impl Fn(Arc<dyn Channel>, OcppError, Value) + Send + Sync + 'static,
    ) {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    pub fn set_invalid_message_hook(
        &self,
        hook: impl Fn(Arc<dyn Channel>, &OcppError, &str, &[Value]) -> Option<OcppError>
            + Send
            + Sync
            + 'static,
    ) {
        *self.invalid_message_hook.write() = Some(Arc::new(hook));
    }

    /// Install the endpoint on the transport and start listening.
    pub fn start(self: &Arc<Self>, port: u16, path: &str) -> Result<(), TransportError> {
        let weak = Arc::downgrade(self);
        self.transport.set_new_client_handler(Box::new({
            let weak = weak.clone();
            move |channel| {
                if let Some(cs) = weak.upgrade() {
                    cs.on_client_connected(channel);
                }
            }
        }));
        self.transport.set_disconnected_client_handler(Box::new({
            let weak = weak.clone();
            move |channel| {
                if let Some(cs) = weak.upgrade() {
                    cs.on_client_disconnected(channel);
                }
            }
        }));
        self.transport.set_message_handler(Box::new({
            let weak = weak.clone();
            move |channel, data| match weak.upgrade() {
                Some(cs) => cs.handle_message(channel, data),
                None => Ok(()),
            }
        }));

        self.dispatcher.start();
        if let Err(err) = self.transport.start(port, path) {
            self.dispatcher.stop();
            return Err(err);
        }
        info!(port, path, "central system started");
        Ok(())
    }

    /// Stop accepting requests and shut the transport down. Queued bundles
    /// are not drained further; in-flight writes are not canceled.
    pub fn stop(&self) {
        self.dispatcher.stop();
        self.transport.stop();
        info!("central system stopped");
    }

    /// Build a validated Call for a request, with a fresh unique id.
    pub fn create_call<R: Request>(&self, request: &R) -> Result<Call, OcppjError> {
        let action = request.feature_name().to_string();
        let feature = self
            .lookup_feature(&action)
            .ok_or_else(|| OcppjError::UnsupportedAction(action.clone()))?;
        let payload = serde_json::to_value(request)?;
        if message_validation_enabled() {
            validate_payload(feature.request_schema(), &payload, "Call", &action)?;
        }
        let unique_id = (self.config.id_generator)();
        Ok(Call::new(unique_id, action, payload))
    }

    /// Build a validated CallResult answering `unique_id`.
    pub fn create_call_result<R: Response>(
        &self,
        response: &R,
        unique_id: &str,
    ) -> Result<CallResult, OcppjError> {
        let action = response.feature_name().to_string();
        let feature = self
            .lookup_feature(&action)
            .ok_or_else(|| OcppjError::UnsupportedResponse(action.clone()))?;
        let payload = serde_json::to_value(response)?;
        if message_validation_enabled() {
            validate_payload(feature.response_schema(), &payload, "CallResult", &action)?;
        }
        Ok(CallResult::new(unique_id, payload))
    }

    /// Enqueue a request towards a charge point. Validation, serialization
    /// and enqueue failures surface synchronously; the transport write is
    /// performed asynchronously by the dispatcher, and write failures are
    /// reported through the dispatcher's request-canceled handler.
    pub fn send_request<R: Request>(&self, client_id: &str, request: &R) -> Result<(), OcppjError> {
        if !self.dispatcher.is_running() {
            return Err(OcppjError::NotStarted);
        }
        let call = self.create_call(request)?;
        let data = call.to_bytes()?;
        debug!(client_id, unique_id = %call.unique_id, action = %call.action, "enqueuing request");
        self.dispatcher.send_request(client_id, RequestBundle { call, data })
    }

    /// Answer a charge point's CALL. Construction and validation errors
    /// return without touching the transport, so the caller can fall back to
    /// [`CentralSystem::handle_failed_response_error`].
    pub fn send_response<R: Response>(
        &self,
        client_id: &str,
        unique_id: &str,
        response: &R,
    ) -> Result<(), OcppjError> {
        let result = self.create_call_result(response, unique_id)?;
        let data = result.to_bytes()?;
        self.transport
            .write(client_id, data)
            .map_err(|err| OcppError::new(ErrorCode::GenericError, err.to_string(), unique_id).into())
    }

    /// Send an explicit CALLERROR answering `unique_id`. The code is drawn
    /// from the closed taxonomy by construction.
    pub fn send_error<D: serde::Serialize>(
        &self,
        client_id: &str,
        unique_id: &str,
        code: ErrorCode,
        description: &str,
        details: Option<D>,
    ) -> Result<(), OcppjError> {
        let details = details.map(serde_json::to_value).transpose()?;
        let call_error = CallError::new(unique_id, code, description, details);
        let data = call_error.to_bytes()?;
        self.transport
            .write(client_id, data)
            .map_err(|err| OcppError::new(ErrorCode::GenericError, err.to_string(), unique_id).into())
    }

    /// Recovery path for a failed reply: translate whatever went wrong while
    /// answering `unique_id` into a wire-level CALLERROR and write it.
    pub fn handle_failed_response_error(
        &self,
        client_id: &str,
        unique_id: &str,
        err: &OcppjError,
        feature_name: &str,
    ) {
        let wire = match err {
            OcppjError::Validation(violation) => OcppError::new(
                violation.code(self.config.dialect),
                violation.to_string(),
                unique_id,
            ),
            OcppjError::UnsupportedResponse(action) => OcppError::new(
                ErrorCode::NotSupported,
                format!("couldn't create Call Result for unsupported action {action}"),
                unique_id,
            ),
            OcppjError::Json(json_err) => {
                OcppError::new(ErrorCode::GenericError, json_err.to_string(), unique_id)
            }
            // A wire-level error (e.g. a failed write) is forwarded verbatim.
            OcppjError::Ocpp(wire_err) => {
                OcppError::new(wire_err.code, wire_err.description.clone(), unique_id)
            }
            other => OcppError::new(ErrorCode::GenericError, other.to_string(), unique_id),
        };
        error!(client_id, unique_id, feature = feature_name, "replying with CALLERROR: {wire}");
        self.write_wire_error(client_id, &wire);
    }

    fn lookup_feature(&self, action: &str) -> Option<Feature> {
        self.profiles
            .read()
            .iter()
            .find_map(|profile| profile.feature(action).cloned())
    }

    fn on_client_connected(&self, channel: Arc<dyn Channel>) {
        info!(client_id = channel.id(), "charge point connected");
        self.dispatcher.create_client(channel.id());
        let handler = self.new_client_handler.read().clone();
        if let Some(handler) = handler {
            handler(channel);
        }
    }

    fn on_client_disconnected(&self, channel: Arc<dyn Channel>) {
        info!(client_id = channel.id(), "charge point disconnected");
        self.dispatcher.delete_client(channel.id());
        let handler = self.disconnected_handler.read().clone();
        if let Some(handler) = handler {
            handler(channel);
        }
    }

    /// Entry point for every raw frame delivered by the transport. The
    /// returned error is also handed back to the transport for logging.
    fn handle_message(&self, channel: Arc<dyn Channel>, data: &[u8]) -> Result<(), OcppError> {
        let raw = String::from_utf8_lossy(data).into_owned();
        let format_code = self.config.dialect.format_violation();

        let parsed: Value = match serde_json::from_slice(data) {
            Ok(parsed) => parsed,
            Err(err) => {
                let err = OcppError::new(format_code, format!("invalid JSON: {err}"), "");
                return self.report_invalid(channel, err, &raw, &[]);
            }
        };
        let fields = match parsed {
            Value::Array(fields) => fields,
            _ => {
                let err = OcppError::new(format_code, "expected a JSON array", "");
                return self.report_invalid(channel, err, &raw, &[]);
            }
        };
        if fields.len() < 3 {
            let err = OcppError::new(
                format_code,
                format!("invalid message, expected array of length >= 3, got {}", fields.len()),
                "",
            );
            return self.report_invalid(channel, err, &raw, &fields);
        }
        let Some(message_type) = MessageType::from_value(&fields[0]) else {
            let err = OcppError::new(
                format_code,
                format!("invalid element {} at position 0, expected message type (2, 3 or 4)", fields[0]),
                "",
            );
            return self.report_invalid(channel, err, &raw, &fields);
        };
        let Some(unique_id) = fields[1].as_str().map(str::to_string) else {
            let err = OcppError::new(
                format_code,
                format!("invalid element {} at position 1, expected unique ID (string)", fields[1]),
                "",
            );
            return self.report_invalid(channel, err, &raw, &fields);
        };

        match message_type {
            MessageType::Call => self.handle_call(channel, &raw, fields, unique_id),
            MessageType::CallResult => self.handle_call_result(channel, &raw, fields, unique_id),
            MessageType::CallError => self.handle_call_error(channel, &raw, fields, unique_id),
        }
    }

    fn handle_call(
        &self,
        channel: Arc<dyn Channel>,
        raw: &str,
        fields: Vec<Value>,
        unique_id: String,
    ) -> Result<(), OcppError> {
        let format_code = self.config.dialect.format_violation();
        if fields.len() != 4 {
            let err = OcppError::new(format_code, "invalid Call message, expected array of length 4", unique_id);
            return self.report_invalid(channel, err, raw, &fields);
        }
        let Some(action) = fields[2].as_str().map(str::to_string) else {
            let err = OcppError::new(
                format_code,
                format!("invalid element {} at position 2, expected action (string)", fields[2]),
                unique_id,
            );
            return self.report_invalid(channel, err, raw, &fields);
        };
        let payload = fields[3].clone();

        match self.lookup_feature(&action) {
            Some(feature) => {
                if let Err(violation) =
                    validate_payload(feature.request_schema(), &payload, "Call", &action)
                {
                    let err = OcppError::new(
                        violation.code(self.config.dialect),
                        violation.to_string(),
                        unique_id,
                    );
                    return self.report_invalid(channel, err, raw, &fields);
                }
            }
            None => {
                // An unknown action is tolerated only while validation is
                // globally disabled; the raw payload then passes through.
                if message_validation_enabled() {
                    let err = OcppError::new(
                        ErrorCode::NotSupported,
                        format!("unsupported action {action}"),
                        unique_id,
                    );
                    return self.report_invalid(channel, err, raw, &fields);
                }
            }
        }

        debug!(client_id = channel.id(), %unique_id, %action, "request received");
        let handler = self.request_handler.read().clone();
        match handler {
            Some(handler) => handler(channel, payload, &unique_id, &action),
            None => warn!(%action, "no request handler registered, dropping request"),
        }
        Ok(())
    }

    fn handle_call_result(
        &self,
        channel: Arc<dyn Channel>,
        raw: &str,
        fields: Vec<Value>,
        unique_id: String,
    ) -> Result<(), OcppError> {
        let client_id = channel.id().to_string();
        if fields.len() != 3 {
            let err = OcppError::new(
                self.config.dialect.format_violation(),
                "invalid Call Result message, expected array of length 3",
                unique_id,
            );
            return self.report_invalid(channel, err, raw, &fields);
        }
        let Some(pending) = self.request_state.get_pending_request(&client_id, &unique_id) else {
            let err = OcppError::new(
                ErrorCode::GenericError,
                format!("unknown uniqueID {unique_id}"),
                unique_id,
            );
            return self.report_invalid(channel, err, raw, &fields);
        };
        let payload = fields[2].clone();

        // The action resolved when the call was created; a feature may only
        // be missing here if its profile was dropped mid-flight.
        if let Some(feature) = self.lookup_feature(&pending.action) {
            if let Err(violation) =
                validate_payload(feature.response_schema(), &payload, "CallResult", &pending.action)
            {
                let err = OcppError::new(
                    violation.code(self.config.dialect),
                    violation.to_string(),
                    unique_id,
                );
                return self.report_invalid(channel, err, raw, &fields);
            }
        }

        debug!(%client_id, %unique_id, action = %pending.action, "response received");
        self.request_state.delete_pending_request(&client_id, &unique_id);
        let handler = self.response_handler.read().clone();
        match handler {
            Some(handler) => handler(channel, payload, &unique_id),
            None => warn!(%unique_id, "no response handler registered, dropping response"),
        }
        self.dispatcher.complete_request(&client_id, &unique_id);
        Ok(())
    }

    fn handle_call_error(
        &self,
        channel: Arc<dyn Channel>,
        raw: &str,
        fields: Vec<Value>,
        unique_id: String,
    ) -> Result<(), OcppError> {
        let client_id = channel.id().to_string();
        let format_code = self.config.dialect.format_violation();
        if fields.len() != 5 {
            let err = OcppError::new(
                format_code,
                "invalid Call Error message, expected array of length 5",
                unique_id,
            );
            return self.report_invalid(channel, err, raw, &fields);
        }
        let Some(code) = fields[2].as_str() else {
            let err = OcppError::new(
                format_code,
                format!("invalid element {} at position 2, expected error code (string)", fields[2]),
                unique_id,
            );
            return self.report_invalid(channel, err, raw, &fields);
        };
        // Unknown inbound codes decode as GenericError rather than bouncing
        // the frame.
        let code = code.parse().unwrap_or(ErrorCode::GenericError);
        let description = fields[3].as_str().unwrap_or("").to_string();
        let details = fields[4].clone();

        if self.request_state.get_pending_request(&client_id, &unique_id).is_none() {
            let err = OcppError::new(
                ErrorCode::GenericError,
                format!("unknown uniqueID {unique_id}"),
                unique_id,
            );
            return self.report_invalid(channel, err, raw, &fields);
        }

        debug!(%client_id, %unique_id, %code, "error received");
        self.request_state.delete_pending_request(&client_id, &unique_id);
        let handler = self.error_handler.read().clone();
        match handler {
            Some(handler) => {
                handler(channel, OcppError::new(code, description, unique_id.clone()), details)
            }
            None => warn!(%unique_id, "no error handler registered, dropping error"),
        }
        self.dispatcher.complete_request(&client_id, &unique_id);
        Ok(())
    }

    /// Funnel for every inbound failure: offers the frame to the
    /// invalid-message hook, writes a CALLERROR back when appropriate, and
    /// returns the (possibly substituted) error to the transport.
    fn report_invalid(
        &self,
        channel: Arc<dyn Channel>,
        err: OcppError,
        raw: &str,
        fields: &[Value],
    ) -> Result<(), OcppError> {
        let hook = self.invalid_message_hook.read().clone();
        let substituted = hook.and_then(|hook| hook(channel.clone(), &err, raw, fields));
        let write_back = substituted.is_some() || message_validation_enabled();
        let err = substituted.unwrap_or(err);
        warn!(client_id = channel.id(), "invalid message: {err}");
        if write_back {
            self.write_wire_error(channel.id(), &err);
        }
        Err(err)
    }

    fn write_wire_error(&self, client_id: &str, err: &OcppError) {
        let call_error = CallError::new(err.message_id.clone(), err.code, err.description.clone(), None);
        match call_error.to_bytes() {
            Ok(data) => {
                if let Err(write_err) = self.transport.write(client_id, data) {
                    error!(client_id, %write_err, "failed to write CALLERROR");
                }
            }
            Err(encode_err) => {
                error!(client_id, %encode_err, "failed to encode CALLERROR");
            }
        }
    }
}
