pub mod memory_backend;
pub mod redis_backend;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory_backend::MemoryBroker;
pub use redis_backend::RedisBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("cannot connect to broker: {0}")]
    Connect(#[source] redis::RedisError),

    #[error("topology declaration failed: {0}")]
    Topology(#[source] redis::RedisError),

    #[error("publish to queue '{queue}' failed: {source}")]
    Publish {
        queue: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("broker connection lost: {0}")]
    ConnectionLost(#[source] redis::RedisError),

    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),
}

/// Per-queue callback registered with [`Broker::consume_many`]. A returned
/// `Ok` acknowledges the message; an `Err` leaves it pending for redelivery,
/// so handlers must tolerate seeing a message twice (at-least-once).
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()>;
}

/// Message-broker client: connection lifecycle, topology, publish, and
/// multi-queue consumption.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares one exchange and the queues bound to it. Idempotent.
    async fn declare_topology(&self, exchange: &str, queues: &[&str]) -> Result<(), BrokerError>;

    /// Publishes a message with durable delivery semantics. On a detected
    /// dead connection the backend reconnects once and retries before
    /// surfacing failure; the caller decides whether to fall back to local
    /// persistence.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Runs a single event loop dispatching inbound messages to the handler
    /// registered for each queue. Only returns on connection loss, which is
    /// fatal for the consuming process: it should exit and rely on external
    /// supervision to restart it.
    async fn consume_many(
        &self,
        handlers: HashMap<String, Arc<dyn QueueHandler>>,
    ) -> Result<(), BrokerError>;

    /// Queue length, for tests and health checks.
    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError>;
}
