//! Configuration for the central-system endpoint.

use std::fmt;

use crate::error::ProtocolDialect;
use crate::message::{default_id_generator, IdGenerator};
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Endpoint knobs. All state is in-memory; nothing here is persisted.
#[derive(Clone)]
pub struct ServerConfig {
    /// Capacity of each per-client outbound queue.
    pub queue_capacity: usize,

    /// Dialect deciding the wording of format-violation error codes.
    pub dialect: ProtocolDialect,

    /// Correlation-id source. Injectable for deterministic tests.
    pub id_generator: IdGenerator,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dialect: ProtocolDialect::default(),
            id_generator: default_id_generator(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_dialect(mut self, dialect: ProtocolDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_id_generator(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.id_generator = std::sync::Arc::new(generator);
        self
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("queue_capacity", &self.queue_capacity)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new()
            .with_queue_capacity(5)
            .with_dialect(ProtocolDialect::Ocpp2)
            .with_id_generator(|| "fixed".to_string());

        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.dialect, ProtocolDialect::Ocpp2);
        assert_eq!((config.id_generator)(), "fixed");
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.dialect, ProtocolDialect::Ocpp16);
    }
}
