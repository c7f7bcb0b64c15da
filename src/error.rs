//! OCPP-J error taxonomy and crate-level error types.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::transport::TransportError;
use crate::validation::ValidationError;

/// OCPP-J error codes, as carried in the third element of a CALLERROR frame.
///
/// The set is closed: outbound errors are constructed from this enum, and
/// unknown inbound code strings decode as [`ErrorCode::GenericError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Requested action is recognized but not implemented by the receiver.
    NotImplemented,
    /// Requested action is not known by the receiver.
    NotSupported,
    /// An internal error occurred while processing a valid request.
    InternalError,
    /// Payload is incomplete for the requested action.
    ProtocolError,
    /// A security issue prevented the receiver from completing the action.
    SecurityError,
    /// Syntactically malformed or incomplete message (OCPP 1.6 wording).
    FormationViolation,
    /// Syntactically malformed or incomplete message (OCPP 2.0.1 wording).
    FormatViolation,
    /// Payload is syntactically correct but at least one field breaches a
    /// value constraint.
    PropertyConstraintViolation,
    /// Payload for the action is missing required fields.
    OccurrenceConstraintViolation,
    /// Payload is syntactically correct but at least one field has the wrong
    /// type.
    TypeConstraintViolation,
    /// Any other error.
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::FormatViolation => "FormatViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotImplemented" => Ok(ErrorCode::NotImplemented),
            "NotSupported" => Ok(ErrorCode::NotSupported),
            "InternalError" => Ok(ErrorCode::InternalError),
            "ProtocolError" => Ok(ErrorCode::ProtocolError),
            "SecurityError" => Ok(ErrorCode::SecurityError),
            "FormationViolation" => Ok(ErrorCode::FormationViolation),
            "FormatViolation" => Ok(ErrorCode::FormatViolation),
            "PropertyConstraintViolation" => Ok(ErrorCode::PropertyConstraintViolation),
            "OccurrenceConstraintViolation" => Ok(ErrorCode::OccurrenceConstraintViolation),
            "TypeConstraintViolation" => Ok(ErrorCode::TypeConstraintViolation),
            "GenericError" => Ok(ErrorCode::GenericError),
            other => Err(UnknownErrorCode(other.to_string())),
        }
    }
}

/// Returned when an inbound CALLERROR carries a code outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown error code {0}")]
pub struct UnknownErrorCode(pub String);

/// Protocol dialect spoken by an endpoint.
///
/// OCPP 1.6 and 2.0.1 name the malformed-message error code differently;
/// the dialect decides which one format errors carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolDialect {
    #[default]
    Ocpp16,
    Ocpp2,
}

impl ProtocolDialect {
    /// The code reported for syntactically malformed messages.
    pub fn format_violation(self) -> ErrorCode {
        match self {
            ProtocolDialect::Ocpp16 => ErrorCode::FormationViolation,
            ProtocolDialect::Ocpp2 => ErrorCode::FormatViolation,
        }
    }
}

/// A wire-level OCPP error: the payload of a CALLERROR frame, tied to the
/// unique id of the message it answers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ocpp message ({message_id}): {code} - {description}")]
pub struct OcppError {
    pub code: ErrorCode,
    pub description: String,
    pub message_id: String,
}

impl OcppError {
    pub fn new(
        code: ErrorCode,
        description: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            code,
            description: description.into(),
            message_id: message_id.into(),
        }
    }
}

/// Errors surfaced by the central-system endpoint and dispatcher.
#[derive(Debug, Error)]
pub enum OcppjError {
    /// The dispatcher is not running (never started, or stopped).
    #[error("ocppj server is not started, couldn't send request")]
    NotStarted,

    /// The per-client outbound queue is at capacity.
    #[error("request queue is full, cannot push new element")]
    QueueFull,

    /// The request's action is not part of any enabled profile.
    #[error("Couldn't create Call for unsupported action {0}")]
    UnsupportedAction(String),

    /// The response's action is not part of any enabled profile.
    #[error("couldn't create Call Result for unsupported action {0}")]
    UnsupportedResponse(String),

    /// A payload breached its declared schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A payload could not be encoded to JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A wire-level error, typically wrapping a failed transport write.
    #[error(transparent)]
    Ocpp(#[from] OcppError),

    /// A transport-level failure outside a message exchange.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::NotImplemented,
            ErrorCode::NotSupported,
            ErrorCode::InternalError,
            ErrorCode::ProtocolError,
            ErrorCode::SecurityError,
            ErrorCode::FormationViolation,
            ErrorCode::FormatViolation,
            ErrorCode::PropertyConstraintViolation,
            ErrorCode::OccurrenceConstraintViolation,
            ErrorCode::TypeConstraintViolation,
            ErrorCode::GenericError,
        ] {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_error_code() {
        let err = "InvalidErrorCode".parse::<ErrorCode>().unwrap_err();
        assert_eq!(err, UnknownErrorCode("InvalidErrorCode".to_string()));
    }

    #[test]
    fn test_ocpp_error_display() {
        let err = OcppError::new(ErrorCode::GenericError, "networkError", "1234");
        assert_eq!(err.to_string(), "ocpp message (1234): GenericError - networkError");
    }

    #[test]
    fn test_dialect_selects_format_code() {
        assert_eq!(
            ProtocolDialect::Ocpp16.format_violation(),
            ErrorCode::FormationViolation
        );
        assert_eq!(
            ProtocolDialect::Ocpp2.format_violation(),
            ErrorCode::FormatViolation
        );
    }
}
