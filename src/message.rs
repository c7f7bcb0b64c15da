//! OCPP-J frame types and wire codec.
//!
//! OCPP-J frames are JSON arrays tagged by a numeric message type:
//! - CALL: `[2, "<id>", "<action>", <payload>]`
//! - CALLRESULT: `[3, "<id>", <payload>]`
//! - CALLERROR: `[4, "<id>", "<code>", "<description>", <details>]`
//!
//! Encoding is exact; decoding of the outer array is permissive (the
//! endpoint classifies the untyped elements and reports violations through
//! the error taxonomy rather than failing the parse wholesale).

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ErrorCode;

/// OCPP-J message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    /// Classify the first element of a decoded frame. Peers serializing
    /// through floating-point JSON encoders may send `2.0` for `2`; both are
    /// accepted.
    pub fn from_value(value: &Value) -> Option<MessageType> {
        let n = value.as_f64()?;
        if n == 2.0 {
            Some(MessageType::Call)
        } else if n == 3.0 {
            Some(MessageType::CallResult)
        } else if n == 4.0 {
            Some(MessageType::CallError)
        } else {
            None
        }
    }
}

/// An outbound or inbound request frame.
#[derive(Debug, Clone)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Wire format: `[2, "<id>", "<action>", <payload>]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&json!([
            MessageType::Call as u8,
            &self.unique_id,
            &self.action,
            &self.payload
        ]))
    }
}

/// A successful response frame, echoing the originating call's unique id.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(unique_id: impl Into<String>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Wire format: `[3, "<id>", <payload>]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&json!([
            MessageType::CallResult as u8,
            &self.unique_id,
            &self.payload
        ]))
    }
}

/// An error response frame. Absent details encode as `{}`.
#[derive(Debug, Clone)]
pub struct CallError {
    pub unique_id: String,
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl CallError {
    pub fn new(
        unique_id: impl Into<String>,
        code: ErrorCode,
        description: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            code,
            description: description.into(),
            details: details.unwrap_or_else(|| Value::Object(Default::default())),
        }
    }

    /// Wire format: `[4, "<id>", "<code>", "<description>", <details>]`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&json!([
            MessageType::CallError as u8,
            &self.unique_id,
            self.code.as_str(),
            &self.description,
            &self.details
        ]))
    }
}

/// A call together with its serialized bytes, cached so retransmission and
/// wire-level comparison never re-encode.
#[derive(Debug, Clone)]
pub struct RequestBundle {
    pub call: Call,
    pub data: Vec<u8>,
}

/// Source of correlation ids. Injectable for tests; the default draws
/// random UUIDs, which peers treat as opaque strings.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub fn default_id_generator() -> IdGenerator {
    Arc::new(|| Uuid::new_v4().to_string())
}
