//! Broker connection and topology for the comments exchange

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusError, EventBus, InMemoryBus, NatsBus, Topology};
use std::sync::Arc;

use crate::contracts::{EventKind, COMMENT_DEAD_LETTER};

pub const DEAD_LETTER_QUEUE: &str = "comments-dlq";

/// The exchange, its work queue bound under every mutation key, and the
/// dead-letter queue bound under `comment.dlq`
pub fn comments_topology(exchange: &str, queue: &str) -> Topology {
    Topology::new(exchange)
        .bind(queue, EventKind::ALL.map(EventKind::routing_key))
        .bind(DEAD_LETTER_QUEUE, [COMMENT_DEAD_LETTER])
}

/// A connected bus, plus the raw NATS client when there is one
pub struct ConnectedBus {
    pub bus: Arc<dyn EventBus>,
    pub nats: Option<async_nats::Client>,
}

/// Connect to the configured broker, retrying while it is unreachable
pub async fn connect_bus(
    bus_type: &str,
    nats_url: &str,
    retry: &RetryConfig,
) -> Result<ConnectedBus, BusError> {
    match bus_type {
        "inmemory" => {
            tracing::info!("Using InMemory event bus");
            Ok(ConnectedBus {
                bus: Arc::new(InMemoryBus::new()),
                nats: None,
            })
        }
        "nats" => {
            tracing::info!(nats_url = %nats_url, "Connecting to NATS");
            let client = retry_with_backoff(
                || async {
                    async_nats::connect(nats_url)
                        .await
                        .map_err(|e| BusError::ConnectionError(e.to_string()))
                },
                retry,
                "connect_nats",
            )
            .await?;

            Ok(ConnectedBus {
                bus: Arc::new(NatsBus::new(client.clone())),
                nats: Some(client),
            })
        }
        other => Err(BusError::ConnectionError(format!(
            "unsupported bus type: {}",
            other
        ))),
    }
}

/// Declare the comments topology, retrying while the broker is not ready
pub async fn ensure_topology(
    bus: &dyn EventBus,
    topology: &Topology,
    retry: &RetryConfig,
) -> Result<(), BusError> {
    retry_with_backoff(|| bus.declare(topology), retry, "declare_topology").await
}
