//! NATS JetStream implementation of the EventBus trait
//!
//! Mapping onto JetStream:
//! - exchange -> stream (file storage, work-queue retention) capturing every
//!   bound routing key as a subject
//! - queue -> durable pull consumer with explicit ack, filtered on the
//!   queue's routing keys
//! - Ack / Requeue / Reject -> `+ACK` / `-NAK` (with optional delay) / `+TERM`

use crate::delivery::Acker;
use crate::{
    BusError, BusMessage, BusResult, Delivery, Disposition, EventBus, Topology, MESSAGE_ID_HEADER,
};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    context::PublishErrorKind,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    AckKind,
};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

/// JetStream header asserting which stream must capture a publish
const EXPECTED_STREAM_HEADER: &str = "Nats-Expected-Stream";
/// JetStream header used for publish-side deduplication
const NATS_MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// EventBus implementation using NATS JetStream
///
/// This is the production implementation that connects to a NATS server.
/// It wraps a single long-lived `async_nats::Client`; the client multiplexes
/// every publish and consumer over one connection, so it is cloned rather
/// than reconnected per call.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{BusMessage, EventBus, NatsBus, Topology};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
///
/// bus.declare(&Topology::new("orders-exchange").bind("orders-queue", ["order.placed"]))
///     .await?;
/// bus.publish("orders-exchange", BusMessage::new("order.placed", b"{}".to_vec()))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    ///
    /// # Arguments
    /// * `client` - An already-connected `async_nats::Client`
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn stream_config(topology: &Topology) -> StreamConfig {
        StreamConfig {
            name: topology.exchange.clone(),
            subjects: topology.routing_keys(),
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::File,
            ..Default::default()
        }
    }
}

fn to_delivery(msg: jetstream::Message) -> Delivery {
    let delivery_count = msg
        .info()
        .ok()
        .and_then(|info| u64::try_from(info.delivered).ok())
        .unwrap_or(1)
        .max(1);

    let mut message = BusMessage::new(msg.message.subject.to_string(), msg.message.payload.to_vec());

    if let Some(nats_headers) = &msg.message.headers {
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                message = message.with_header(key.to_string(), value.to_string());
            }
        }
    }

    Delivery::new(message, delivery_count, Box::new(NatsAcker { message: msg }))
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn settle(self: Box<Self>, disposition: Disposition) -> BusResult<()> {
        let result = match disposition {
            // Wait for the server to confirm so a lost ack surfaces here
            Disposition::Ack => self.message.double_ack().await,
            Disposition::Requeue { delay } => self.message.ack_with(AckKind::Nak(delay)).await,
            Disposition::Reject => self.message.ack_with(AckKind::Term).await,
        };
        result.map_err(|e| BusError::SettleError(e.to_string()))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn declare(&self, topology: &Topology) -> BusResult<()> {
        let config = Self::stream_config(topology);

        let mut stream = self
            .jetstream
            .get_or_create_stream(config.clone())
            .await
            .map_err(|e| BusError::TopologyError(e.to_string()))?;

        // An existing stream may predate newly bound routing keys
        let info = stream
            .info()
            .await
            .map_err(|e| BusError::TopologyError(e.to_string()))?;
        let existing = info.config.subjects.clone();

        if config.subjects.iter().any(|s| !existing.contains(s)) {
            let mut merged = config;
            for subject in existing {
                if !merged.subjects.contains(&subject) {
                    merged.subjects.push(subject);
                }
            }
            self.jetstream
                .update_stream(&merged)
                .await
                .map_err(|e| BusError::TopologyError(e.to_string()))?;
            tracing::info!(
                exchange = %topology.exchange,
                subjects = ?merged.subjects,
                "Updated stream subjects"
            );
        }

        for binding in &topology.queues {
            let _consumer: PullConsumer = stream
                .get_or_create_consumer(
                    &binding.queue,
                    pull::Config {
                        durable_name: Some(binding.queue.clone()),
                        ack_policy: AckPolicy::Explicit,
                        filter_subjects: binding.routing_keys.clone(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| BusError::TopologyError(e.to_string()))?;
        }

        tracing::info!(exchange = %topology.exchange, queues = topology.queues.len(), "Topology declared");
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: BusMessage) -> BusResult<()> {
        let BusMessage {
            routing_key,
            payload,
            headers: extra,
        } = message;

        let mut headers = HeaderMap::new();
        if let Some(extra) = &extra {
            for (key, value) in extra {
                headers.insert(key.as_str(), value.as_str());
            }
            if let Some(id) = extra.get(MESSAGE_ID_HEADER) {
                headers.insert(NATS_MSG_ID_HEADER, id.as_str());
            }
        }
        headers.insert(EXPECTED_STREAM_HEADER, exchange);

        let map_publish_error = |e: jetstream::context::PublishError| match e.kind() {
            PublishErrorKind::StreamNotFound => BusError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.clone(),
            },
            _ => BusError::PublishError(e.to_string()),
        };

        // Awaiting the ack future means the stream has persisted the message
        self.jetstream
            .publish_with_headers(routing_key.clone(), headers, payload.into())
            .await
            .map_err(&map_publish_error)?
            .await
            .map_err(&map_publish_error)?;

        Ok(())
    }

    async fn consume(
        &self,
        exchange: &str,
        queue: &str,
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        let stream = self
            .jetstream
            .get_stream(exchange)
            .await
            .map_err(|e| BusError::ConsumeError(e.to_string()))?;

        let consumer: PullConsumer = stream
            .get_consumer(queue)
            .await
            .map_err(|e| BusError::ConsumeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::ConsumeError(e.to_string()))?;

        let deliveries = messages.map(|result| match result {
            Ok(msg) => Ok(to_delivery(msg)),
            Err(e) => Err(BusError::ConsumeError(e.to_string())),
        });

        Ok(deliveries.boxed())
    }
}
