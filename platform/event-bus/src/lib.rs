//! # EventBus Abstraction
//!
//! A broker abstraction for durable, at-least-once messaging between a
//! producer and one or more competing consumers.
//!
//! ## Model
//!
//! - An **exchange** receives published messages and routes them by exact
//!   routing key to every bound **queue**.
//! - A **queue** holds messages until a consumer settles them.
//! - Every consumed message arrives as a [`Delivery`] that must be settled
//!   exactly once: acknowledged, requeued for redelivery, or rejected.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS JetStream
//!   (exchange = stream, queue = durable pull consumer)
//! - **InMemoryBus**: Test/dev implementation with FIFO in-process queues
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{BusMessage, EventBus, InMemoryBus, Topology};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let topology = Topology::new("orders-exchange")
//!     .bind("orders-queue", ["order.placed", "order.cancelled"]);
//! bus.declare(&topology).await?;
//!
//! bus.publish("orders-exchange", BusMessage::new("order.placed", b"{}".to_vec()))
//!     .await?;
//!
//! let mut deliveries = bus.consume("orders-exchange", "orders-queue").await?;
//! if let Some(delivery) = deliveries.next().await {
//!     delivery?.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod delivery;
mod inmemory_bus;
mod nats_bus;
mod topology;

pub use delivery::{Delivery, Disposition};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use topology::{QueueBinding, Topology};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header carrying a producer-assigned unique message id.
///
/// Brokers that support publish-side deduplication use it to drop
/// retried publishes of the same message.
pub const MESSAGE_ID_HEADER: &str = "message-id";

/// A message published to, or received from, the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Routing key used by the exchange to select bound queues
    pub routing_key: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<HashMap<String, String>>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            headers: None,
        }
    }

    /// Add a single header, creating the header map if needed
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Tag the message with a unique id for broker-side deduplication
    pub fn with_message_id(self, id: impl Into<String>) -> Self {
        self.with_header(MESSAGE_ID_HEADER, id)
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(key))
            .map(String::as_str)
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("no queue bound to routing key {routing_key} on exchange {exchange}")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("failed to consume from queue: {0}")]
    ConsumeError(String),

    #[error("failed to declare topology: {0}")]
    TopologyError(String),

    #[error("failed to settle delivery: {0}")]
    SettleError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Deliveries handed out by [`EventBus::consume`]
pub type DeliveryStream = BoxStream<'static, BusResult<Delivery>>;

/// Core event bus abstraction for durable exchange/queue messaging
///
/// Publishing and consuming are decoupled: producers only know the exchange,
/// consumers only know the queue. The [`Topology`] binding them is declared
/// by whichever side starts first; declaration is idempotent.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Idempotently create the exchange, its queues, and their bindings
    async fn declare(&self, topology: &Topology) -> BusResult<()>;

    /// Publish a message durably to an exchange
    ///
    /// # Returns
    /// * `Ok(())` once the broker has accepted responsibility for the message
    /// * `Err(BusError::Unroutable)` if no queue is bound to the routing key
    /// * `Err(BusError)` for any other broker failure
    async fn publish(&self, exchange: &str, message: BusMessage) -> BusResult<()>;

    /// Start consuming a queue
    ///
    /// Each call creates an independent consumer; concurrent consumers of the
    /// same queue receive distinct deliveries. A stream item is `Err` when the
    /// broker fails to hand over a message; the stream may continue after it.
    async fn consume(
        &self,
        exchange: &str,
        queue: &str,
    ) -> BusResult<DeliveryStream>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_created_lazily() {
        let msg = BusMessage::new("a.b", Vec::new());
        assert!(msg.headers.is_none());
        assert_eq!(msg.header("x"), None);

        let msg = msg.with_header("x", "1").with_message_id("abc");
        assert_eq!(msg.header("x"), Some("1"));
        assert_eq!(msg.header(MESSAGE_ID_HEADER), Some("abc"));
    }
}
