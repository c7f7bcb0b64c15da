//! # ek-csms
//!
//! OCPP-J central-system messaging core: the JSON-over-WebSocket framing and
//! dispatch layer a charging backend builds on. It frames application
//! request/response/error objects as OCPP-J messages, correlates replies with
//! pending requests across many concurrent charge points, and enforces the
//! per-peer one-outstanding-request rule.
//!
//! ## Architecture
//!
//! ```text
//! application handlers / send_request
//!            │
//!            ▼
//! ┌───────────────────────────────────────────┐
//! │              CentralSystem                │
//! │  validate → frame → enqueue → correlate   │
//! │ ┌───────────┐ ┌─────────┐ ┌─────────────┐ │
//! │ │ Profiles  │ │ Pending │ │ Dispatcher  │ │
//! │ │ + schemas │ │  table  │ │ (per-client │ │
//! │ │           │ │         │ │  queue+FSM) │ │
//! │ └───────────┘ └─────────┘ └─────────────┘ │
//! └───────────────────┬───────────────────────┘
//!                     │ Transport trait
//!                     ▼
//! ┌───────────────────────────────────────────┐
//! │        WebSocketServer (tungstenite)      │
//! │   one channel per connected charge point  │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ek_csms::{CentralSystem, Feature, FieldRule, PayloadSchema, Profile, WebSocketServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(WebSocketServer::new());
//!     let csms = CentralSystem::new(transport);
//!     csms.add_profile(Profile::new("core").with_feature(Feature::new(
//!         "Echo",
//!         PayloadSchema::new().field(FieldRule::string("data").required()),
//!         PayloadSchema::new().field(FieldRule::string("data").required()),
//!     )));
//!     csms.set_request_handler(|channel, payload, unique_id, action| {
//!         println!("{} sent {action}: {payload} ({unique_id})", channel.id());
//!     });
//!     csms.start(8887, "/ws")?;
//!     tokio::signal::ctrl_c().await?;
//!     csms.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod profile;
pub mod queue;
pub mod server;
pub mod state;
pub mod transport;
pub mod validation;
pub mod ws;

pub use config::ServerConfig;
pub use dispatcher::ServerDispatcher;
pub use error::{ErrorCode, OcppError, OcppjError, ProtocolDialect};
pub use message::{Call, CallError, CallResult, MessageType, RequestBundle};
pub use profile::{Feature, Profile, Request, Response};
pub use queue::{RequestQueue, DEFAULT_QUEUE_CAPACITY};
pub use server::CentralSystem;
pub use state::{ClientState, PendingRequest, ServerState};
pub use transport::{Channel, Transport, TransportError};
pub use validation::{
    message_validation_enabled, set_message_validation, FieldRule, PayloadSchema, ValidationError,
};
pub use ws::WebSocketServer;
