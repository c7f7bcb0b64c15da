//! Feature and profile catalogue.
//!
//! A [`Feature`] is a named request/response pair with declared payload
//! schemas; a [`Profile`] is a read-only set of features enabled together on
//! an endpoint. The messaging core queries the catalogue to resolve actions
//! and fetch schemas; it never defines features itself.

use std::collections::HashMap;

use serde::Serialize;

use crate::validation::PayloadSchema;

/// An application-level request payload, tied to its feature by name.
pub trait Request: Serialize + Send + Sync {
    fn feature_name(&self) -> &str;
}

/// An application-level response payload, tied to its feature by name.
pub trait Response: Serialize + Send + Sync {
    fn feature_name(&self) -> &str;
}

/// A named request-response pair with its payload schemas.
#[derive(Debug, Clone)]
pub struct Feature {
    name: String,
    request_schema: PayloadSchema,
    response_schema: PayloadSchema,
}

impl Feature {
    pub fn new(
        name: impl Into<String>,
        request_schema: PayloadSchema,
        response_schema: PayloadSchema,
    ) -> Self {
        Self {
            name: name.into(),
            request_schema,
            response_schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_schema(&self) -> &PayloadSchema {
        &self.request_schema
    }

    pub fn response_schema(&self) -> &PayloadSchema {
        &self.response_schema
    }
}

/// A set of features enabled on an endpoint.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    name: String,
    features: HashMap<String, Feature>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: HashMap::new(),
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature.name().to_string(), feature);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }
}
