//! Declarative payload schemas and the constraint validator.
//!
//! Features declare the shape of their request and response payloads as a
//! [`PayloadSchema`]; [`validate_payload`] is a pure function checking a
//! decoded JSON value against one. Validation errors carry the offending
//! field path and the feature name, and map onto the OCPP-J constraint error
//! codes (occurrence, property, format).

use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::error::{ErrorCode, ProtocolDialect};

/// Process-wide switch for outbound payload validation.
///
/// Disabling it skips schema checks on outgoing requests and responses; wire
/// framing and inbound constraint checking are unaffected, except that
/// unknown inbound actions are tolerated while validation is off.
static MESSAGE_VALIDATION: AtomicBool = AtomicBool::new(true);

pub fn set_message_validation(enabled: bool) {
    MESSAGE_VALIDATION.store(enabled, Ordering::SeqCst);
}

pub fn message_validation_enabled() -> bool {
    MESSAGE_VALIDATION.load(Ordering::SeqCst)
}

/// Declared JSON type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

/// Constraints for one payload field.
///
/// `min`/`max` bound the length of strings and arrays and the value of
/// numbers, mirroring the constraint vocabulary of the OCPP schemas.
#[derive(Debug, Clone)]
pub struct FieldRule {
    key: String,
    kind: FieldKind,
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    pattern: Option<Regex>,
    allowed: Option<Vec<String>>,
}

impl FieldRule {
    fn new(key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
            min: None,
            max: None,
            pattern: None,
            allowed: None,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::String)
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Integer)
    }

    pub fn number(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Number)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Boolean)
    }

    pub fn object(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Object)
    }

    pub fn array(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Array)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, bound: f64) -> Self {
        self.min = Some(bound);
        self
    }

    pub fn max(mut self, bound: f64) -> Self {
        self.max = Some(bound);
        self
    }

    /// Constrain string values to a pre-compiled pattern.
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Constrain string values to an enumerated set.
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Declared shape of a request or response payload.
#[derive(Debug, Clone, Default)]
pub struct PayloadSchema {
    fields: Vec<FieldRule>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }
}

/// Structured schema violation. Display strings are part of the wire
/// contract: they become CALLERROR descriptions verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Field {path} required but not found for feature {feature}")]
    Occurrence { path: String, feature: String },

    #[error("Field {path} must be {rule} {bound}, but was {actual} for feature {feature}")]
    Property {
        path: String,
        rule: &'static str,
        bound: String,
        actual: String,
        feature: String,
    },

    #[error("cannot decode {actual} into field {path} of type {expected}")]
    Type {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl ValidationError {
    /// The OCPP-J error code this violation maps to on the wire.
    pub fn code(&self, dialect: ProtocolDialect) -> ErrorCode {
        match self {
            ValidationError::Occurrence { .. } => ErrorCode::OccurrenceConstraintViolation,
            ValidationError::Property { .. } => ErrorCode::PropertyConstraintViolation,
            ValidationError::Type { .. } => dialect.format_violation(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `mockValue` renders as `Call.Payload.MockValue` in error paths.
fn field_path(message: &str, key: &str) -> String {
    let mut chars = key.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    format!("{message}.Payload.{capitalized}")
}

fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 {
        format!("{}", bound as i64)
    } else {
        format!("{bound}")
    }
}

/// Validate a decoded payload against a schema.
///
/// `message` names the enclosing frame kind (`Call` or `CallResult`) and
/// `feature` the action, both for error reporting only.
pub fn validate_payload(
    schema: &PayloadSchema,
    payload: &Value,
    message: &str,
    feature: &str,
) -> Result<(), ValidationError> {
    let Some(object) = payload.as_object() else {
        return Err(ValidationError::Type {
            path: format!("{message}.Payload"),
            expected: "object",
            actual: json_kind(payload),
        });
    };

    for rule in &schema.fields {
        let path = field_path(message, &rule.key);
        let value = match object.get(&rule.key) {
            None | Some(Value::Null) => {
                if rule.required {
                    return Err(ValidationError::Occurrence {
                        path,
                        feature: feature.to_string(),
                    });
                }
                continue;
            }
            Some(value) => value,
        };

        if !rule.kind.matches(value) {
            return Err(ValidationError::Type {
                path,
                expected: rule.kind.name(),
                actual: json_kind(value),
            });
        }

        // An empty string does not satisfy a required field, matching the
        // occurrence semantics of the OCPP payload schemas.
        if rule.required && value.as_str() == Some("") {
            return Err(ValidationError::Occurrence {
                path,
                feature: feature.to_string(),
            });
        }

        // min/max bound string/array length and numeric value.
        let measured = match rule.kind {
            FieldKind::String => value.as_str().map(|s| s.chars().count() as f64),
            FieldKind::Array => value.as_array().map(|a| a.len() as f64),
            FieldKind::Integer | FieldKind::Number => value.as_f64(),
            _ => None,
        };
        if let Some(measured) = measured {
            if let Some(min) = rule.min {
                if measured < min {
                    return Err(ValidationError::Property {
                        path,
                        rule: "minimum",
                        bound: format_bound(min),
                        actual: format_bound(measured),
                        feature: feature.to_string(),
                    });
                }
            }
            if let Some(max) = rule.max {
                if measured > max {
                    return Err(ValidationError::Property {
                        path,
                        rule: "maximum",
                        bound: format_bound(max),
                        actual: format_bound(measured),
                        feature: feature.to_string(),
                    });
                }
            }
        }

        if let (Some(pattern), Some(s)) = (&rule.pattern, value.as_str()) {
            if !pattern.is_match(s) {
                return Err(ValidationError::Property {
                    path,
                    rule: "matching",
                    bound: pattern.as_str().to_string(),
                    actual: s.to_string(),
                    feature: feature.to_string(),
                });
            }
        }

        if let (Some(allowed), Some(s)) = (&rule.allowed, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(ValidationError::Property {
                    path,
                    rule: "one of",
                    bound: format!("[{}]", allowed.join(", ")),
                    actual: s.to_string(),
                    feature: feature.to_string(),
                });
            }
        }
    }

    Ok(())
}
