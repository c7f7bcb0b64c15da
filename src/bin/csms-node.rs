//! csms-node - demo central system over the WebSocket transport.
//!
//! Accepts charge point connections on `ws://host:port/<path>/<stationId>`,
//! logs their traffic, and answers a simple `Echo` feature so a station can
//! be exercised end to end:
//!
//! ```bash
//! # Listen on the default port
//! csms-node
//!
//! # Custom port and base path, verbose logging
//! csms-node --port 9000 --path /ocpp --log-level debug
//! ```

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ek_csms::{
    CentralSystem, Feature, FieldRule, PayloadSchema, Profile, Response, WebSocketServer,
};

/// OCPP-J central system demo node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen port
    #[arg(short, long, default_value = "8887")]
    port: u16,

    /// Base URL path charge points connect beneath
    #[arg(long, default_value = "/ws")]
    path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EchoResponse {
    data: String,
}

impl Response for EchoResponse {
    fn feature_name(&self) -> &str {
        "Echo"
    }
}

fn echo_feature() -> Feature {
    Feature::new(
        "Echo",
        PayloadSchema::new().field(FieldRule::string("data").required()),
        PayloadSchema::new().field(FieldRule::string("data").required()),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level: Level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let transport = Arc::new(WebSocketServer::new());
    let csms = CentralSystem::new(transport.clone());
    csms.add_profile(Profile::new("demo").with_feature(echo_feature()));

    csms.set_new_client_handler(|channel| {
        info!(client_id = channel.id(), "station connected");
    });
    csms.set_disconnected_client_handler(|channel| {
        info!(client_id = channel.id(), "station disconnected");
    });

    let responder = csms.clone();
    csms.set_request_handler(move |channel, payload, unique_id, action| {
        let client_id = channel.id();
        info!(client_id, action, unique_id, "request: {payload}");
        let data = payload
            .get("data")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();
        let response = EchoResponse { data };
        if let Err(err) = responder.send_response(client_id, unique_id, &response) {
            warn!(client_id, unique_id, %err, "failed to respond, sending CALLERROR");
            responder.handle_failed_response_error(client_id, unique_id, &err, "Echo");
        }
    });
    csms.set_response_handler(|channel, payload, unique_id| {
        info!(client_id = channel.id(), unique_id, "response: {payload}");
    });
    csms.set_error_handler(|channel, error, details| {
        warn!(client_id = channel.id(), %error, "error from station: {details}");
    });
    csms.set_invalid_message_hook(|channel, error, raw, _fields| {
        warn!(client_id = channel.id(), %error, "malformed frame: {raw}");
        None
    });
    csms.dispatcher().set_request_canceled_handler(|client_id, unique_id, action, error| {
        warn!(client_id, unique_id, action, %error, "outbound request dropped");
    });

    csms.start(args.port, &args.path)?;
    if let Some(addr) = transport.local_addr() {
        info!(%addr, path = %args.path, "central system ready");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    csms.stop();
    Ok(())
}
