//! Shared fixtures for the comments integration tests
//!
//! Everything here runs against the in-memory broker and store, so these
//! tests need no running infrastructure.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use comments_rs::auth::{AuthError, IdentityVerifier, VerifiedUser};
use comments_rs::broker_setup::{comments_topology, DEAD_LETTER_QUEUE};
use comments_rs::consumer::{CommentConsumer, ConsumerSettings};
use comments_rs::events::{CommentEventPublisher, PublishLimiter};
use comments_rs::metrics::Metrics;
use comments_rs::repos::InMemoryCommentStore;
use comments_rs::routes::AppState;
use event_bus::consumer_retry::RetryConfig;
use event_bus::{BusMessage, DeliveryStream, Disposition, EventBus, InMemoryBus};
use futures::StreamExt;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;

pub const EXCHANGE: &str = "comments-exchange";
pub const QUEUE: &str = "comments-queue";

/// Settings with immediate redelivery so tests never sleep
pub fn fast_settings() -> ConsumerSettings {
    ConsumerSettings {
        apply_timeout: Duration::from_secs(2),
        max_deliveries: 3,
        redelivery_delay: Duration::ZERO,
        resubscribe: RetryConfig::fixed(3, Duration::from_millis(10)),
    }
}

pub async fn declared_bus() -> InMemoryBus {
    let bus = InMemoryBus::new();
    bus.declare(&comments_topology(EXCHANGE, QUEUE))
        .await
        .expect("declare comments topology");
    bus
}

/// A consumer wired to an in-memory bus and store, driven one delivery at a
/// time
pub struct Pipeline {
    pub bus: InMemoryBus,
    pub store: InMemoryCommentStore,
    pub metrics: Metrics,
    pub consumer: CommentConsumer,
    deliveries: DeliveryStream,
}

impl Pipeline {
    pub async fn new(settings: ConsumerSettings) -> Self {
        let bus = declared_bus().await;
        let store = InMemoryCommentStore::new();
        let metrics = Metrics::new();
        let consumer = CommentConsumer::new(
            Arc::new(bus.clone()),
            Arc::new(store.clone()),
            EXCHANGE,
            QUEUE,
            settings,
            metrics.clone(),
        );
        let deliveries = bus.consume(EXCHANGE, QUEUE).await.expect("consume");

        Self {
            bus,
            store,
            metrics,
            consumer,
            deliveries,
        }
    }

    pub async fn publish(&self, routing_key: &str, body: serde_json::Value) {
        self.publish_raw(routing_key, serde_json::to_vec(&body).unwrap())
            .await;
    }

    pub async fn publish_raw(&self, routing_key: &str, payload: Vec<u8>) {
        self.bus
            .publish(EXCHANGE, BusMessage::new(routing_key, payload))
            .await
            .expect("publish");
    }

    /// Receive the next delivery and run it through the consumer
    pub async fn step(&mut self) -> Disposition {
        let delivery = tokio::time::timeout(Duration::from_secs(2), self.deliveries.next())
            .await
            .expect("a delivery within 2s")
            .expect("stream open")
            .expect("delivery");
        self.consumer.handle(delivery).await
    }

    pub fn main_queue_drained(&self) -> bool {
        self.bus.is_drained(QUEUE)
    }

    /// Every message currently waiting on the dead-letter queue
    pub async fn dead_letters(&self) -> Vec<BusMessage> {
        let mut stream = self
            .bus
            .consume(EXCHANGE, DEAD_LETTER_QUEUE)
            .await
            .expect("consume dlq");
        let mut messages = Vec::new();
        while self.bus.ready_count(DEAD_LETTER_QUEUE) > 0 {
            let delivery = stream.next().await.unwrap().unwrap();
            messages.push(delivery.message.clone());
            delivery.ack().await.unwrap();
        }
        messages
    }
}

pub fn created(ticket_id: i64, author_id: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "ticket_id": ticket_id,
        "author_id": author_id,
        "comment_text": text,
        "creation_date": "2024-01-01T00:00:00Z"
    })
}

/// Accepts `token-<id>` as user `<id>`; `down` simulates an unreachable
/// identity service
pub struct StubVerifier;

#[async_trait]
impl IdentityVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        if token == "down" {
            return Err(AuthError::Unavailable("connection refused".into()));
        }
        token
            .strip_prefix("token-")
            .and_then(|id| id.parse().ok())
            .map(|id| VerifiedUser {
                id,
                email: Some(format!("user{}@example.com", id)),
                role: Some("developer".into()),
            })
            .ok_or(AuthError::InvalidToken)
    }
}

pub fn app_state(bus: &InMemoryBus, store: &InMemoryCommentStore) -> AppState {
    let metrics = Metrics::new();
    AppState {
        publisher: CommentEventPublisher::new(
            Arc::new(bus.clone()),
            EXCHANGE,
            PublishLimiter::new(8, 100),
            metrics.clone(),
        ),
        store: Arc::new(store.clone()),
        verifier: Arc::new(StubVerifier),
        metrics,
        nats: None,
        consumer_workers: 0,
    }
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}
