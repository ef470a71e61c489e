//! Comment mutation consumer
//!
//! Pulls deliveries from the comments queue one at a time, applies each one
//! through [`process_event`], and settles it only after the outcome is final:
//!
//! - applied (or already applied) -> ack
//! - not found / unauthorized -> reject, the event is dropped
//! - store unavailable / timeout -> requeue with delay, until the delivery
//!   count reaches `max_deliveries`
//! - malformed, store-rejected, or out of retries -> dead-letter, then reject

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusResult, Delivery, DeliveryStream, Disposition, EventBus, MESSAGE_ID_HEADER};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::dlq;
use crate::metrics::Metrics;
use crate::repos::CommentStore;
use crate::services::comment_service::{kind_label, process_event, Applied, ProcessingError};

/// Tuning knobs for a consumer worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Upper bound on one decode-and-apply attempt
    pub apply_timeout: Duration,
    /// Deliveries allowed for a transiently failing event before it is
    /// dead-lettered
    pub max_deliveries: u64,
    /// Delay before a requeued delivery becomes visible again
    pub redelivery_delay: Duration,
    /// Attempts to (re)subscribe to the queue before the worker gives up
    pub resubscribe: RetryConfig,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            apply_timeout: Duration::from_secs(5),
            max_deliveries: 5,
            redelivery_delay: Duration::from_secs(1),
            resubscribe: RetryConfig::fixed(10, Duration::from_secs(2)),
        }
    }
}

/// What to do with a delivery once processing has finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ack,
    /// Permanent business rejection; drop without requeue
    Drop,
    /// Transient failure; hand back to the broker for another attempt
    Retry,
    /// Permanent failure, or transient failure out of attempts
    DeadLetter,
}

impl Verdict {
    pub fn classify(
        result: &Result<Applied, ProcessingError>,
        delivery_count: u64,
        max_deliveries: u64,
    ) -> Self {
        match result {
            Ok(_) => Verdict::Ack,
            Err(e) if e.is_business_rejection() => Verdict::Drop,
            Err(e) if e.is_transient() && delivery_count < max_deliveries => Verdict::Retry,
            Err(_) => Verdict::DeadLetter,
        }
    }
}

/// A single worker on the comments queue
///
/// Cloning is cheap; every clone shares the bus, store and metrics.
#[derive(Clone)]
pub struct CommentConsumer {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn CommentStore>,
    exchange: String,
    queue: String,
    settings: ConsumerSettings,
    metrics: Metrics,
}

impl CommentConsumer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn CommentStore>,
        exchange: impl Into<String>,
        queue: impl Into<String>,
        settings: ConsumerSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            bus,
            store,
            exchange: exchange.into(),
            queue: queue.into(),
            settings,
            metrics,
        }
    }

    /// Receive loop
    ///
    /// Runs until the shutdown signal flips to `true` (or its sender goes
    /// away). A delivery already being handled when shutdown is signalled is
    /// finished and settled first. When the broker ends the stream the worker
    /// subscribes again; it only gives up once `resubscribe` is exhausted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> BusResult<()> {
        self.metrics.consumer_workers_running.inc();
        let result = self.receive(&mut shutdown).await;
        self.metrics.consumer_workers_running.dec();

        tracing::info!(queue = %self.queue, "Comment consumer stopped");
        result
    }

    async fn receive(&self, shutdown: &mut watch::Receiver<bool>) -> BusResult<()> {
        loop {
            let Some(mut deliveries) = self.subscribe(shutdown).await? else {
                return Ok(());
            };
            tracing::info!(exchange = %self.exchange, queue = %self.queue, "Comment consumer subscribed");

            if !self.drain(&mut deliveries, shutdown).await {
                return Ok(());
            }

            tracing::warn!(queue = %self.queue, "Delivery stream ended, resubscribing");
            tokio::select! {
                biased;
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.settings.resubscribe.initial_backoff) => {}
            }
        }
    }

    /// Subscribe with retries; `None` once shutdown is requested
    async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BusResult<Option<DeliveryStream>> {
        if *shutdown.borrow() {
            return Ok(None);
        }

        let consume = retry_with_backoff(
            || self.bus.consume(&self.exchange, &self.queue),
            &self.settings.resubscribe,
            "consume_comments",
        );

        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => Ok(None),
            deliveries = consume => deliveries.map(Some),
        }
    }

    /// Handle deliveries until shutdown (`false`) or the stream ends (`true`)
    async fn drain(
        &self,
        deliveries: &mut DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    continue;
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.handle(delivery).await;
                }
                Some(Err(e)) => {
                    tracing::error!(queue = %self.queue, error = %e, "Failed to receive delivery");
                }
                None => return true,
            }
        }
    }

    /// Process and settle one delivery, returning how it was settled
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let routing_key = delivery.message.routing_key.clone();
        let span = tracing::info_span!(
            "comment_delivery",
            routing_key = %routing_key,
            event_id = %delivery.message.header(MESSAGE_ID_HEADER).unwrap_or("none"),
            delivery_count = delivery.delivery_count,
        );

        async move {
            let kind = kind_label(&routing_key);

            let started = Instant::now();
            let result = process_event(
                self.store.as_ref(),
                &routing_key,
                &delivery.message.payload,
                self.settings.apply_timeout,
            )
            .await;
            self.metrics
                .apply_duration_seconds
                .with_label_values(&[kind])
                .observe(started.elapsed().as_secs_f64());

            let verdict = Verdict::classify(
                &result,
                delivery.delivery_count,
                self.settings.max_deliveries,
            );
            let (disposition, outcome) = self.resolve(&delivery, &result, verdict).await;

            if let Err(e) = delivery.settle(disposition).await {
                // The broker will redeliver; the store work is idempotent
                tracing::error!(error = %e, ?disposition, "Failed to settle delivery");
            }
            self.metrics.record_delivery(kind, outcome);

            disposition
        }
        .instrument(span)
        .await
    }

    async fn resolve(
        &self,
        delivery: &Delivery,
        result: &Result<Applied, ProcessingError>,
        verdict: Verdict,
    ) -> (Disposition, &'static str) {
        match (verdict, result) {
            (Verdict::Ack, Ok(Applied::DuplicateCreate { .. })) => (Disposition::Ack, "duplicate"),
            (Verdict::Ack, _) => (Disposition::Ack, "applied"),
            (Verdict::Drop, Err(e)) => {
                tracing::warn!(reason = e.label(), error = %e, "Event rejected, dropping");
                (Disposition::Reject, "rejected")
            }
            (Verdict::Retry, Err(e)) => {
                tracing::warn!(
                    reason = e.label(),
                    error = %e,
                    max_deliveries = self.settings.max_deliveries,
                    "Transient failure, requeueing"
                );
                (self.requeue(), "requeued")
            }
            (_, result) => {
                let error = match result {
                    Err(e) => e.to_string(),
                    Ok(_) => "unexpected verdict".to_string(),
                };
                match dlq::send_to_dlq(
                    self.bus.as_ref(),
                    &self.exchange,
                    &delivery.message,
                    &error,
                    delivery.delivery_count,
                )
                .await
                {
                    Ok(()) => (Disposition::Reject, "dead_lettered"),
                    Err(_) => (self.requeue(), "requeued"),
                }
            }
        }
    }

    fn requeue(&self) -> Disposition {
        let delay = self.settings.redelivery_delay;
        Disposition::Requeue {
            delay: (!delay.is_zero()).then_some(delay),
        }
    }
}

/// Spawn `workers` competing consumers on the same queue
///
/// Each worker stops when `shutdown` flips to `true`, or earlier if it cannot
/// subscribe within its retry budget; await the returned handles to wait for
/// in-flight deliveries to settle.
pub fn start_comment_consumers(
    consumer: CommentConsumer,
    workers: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = consumer.run(shutdown).await {
                        tracing::error!(error = %e, "Comment consumer gave up subscribing");
                    }
                }
                .instrument(tracing::info_span!("comment_consumer", worker)),
            )
        })
        .collect()
}

/// Resolves once `shutdown` is `true` or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::DecodeError;
    use crate::repos::{InMemoryCommentStore, StoreError};
    use event_bus::InMemoryBus;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_worker_future_can_be_spawned() {
        let consumer = CommentConsumer::new(
            Arc::new(InMemoryBus::new()),
            Arc::new(InMemoryCommentStore::new()),
            "comments-exchange",
            "comments-queue",
            ConsumerSettings::default(),
            Metrics::new(),
        );
        let (_tx, rx) = watch::channel(false);
        assert_send(&consumer.run(rx));
    }

    #[test]
    fn test_classify_outcomes() {
        let applied: Result<Applied, ProcessingError> = Ok(Applied::Updated { id: 1 });
        assert_eq!(Verdict::classify(&applied, 1, 5), Verdict::Ack);

        let not_found = Err(ProcessingError::NotFound(1));
        assert_eq!(Verdict::classify(&not_found, 1, 5), Verdict::Drop);

        let malformed = Err(ProcessingError::Malformed(DecodeError::UnknownRoutingKey(
            "x".into(),
        )));
        assert_eq!(Verdict::classify(&malformed, 1, 5), Verdict::DeadLetter);

        let rejected = Err(ProcessingError::StoreRejected("23514".into()));
        assert_eq!(Verdict::classify(&rejected, 1, 5), Verdict::DeadLetter);
    }

    #[test]
    fn test_transient_failures_retry_until_max_deliveries() {
        let down = || Err(ProcessingError::Store(StoreError::Unavailable("down".into())));
        assert_eq!(Verdict::classify(&down(), 1, 3), Verdict::Retry);
        assert_eq!(Verdict::classify(&down(), 2, 3), Verdict::Retry);
        assert_eq!(Verdict::classify(&down(), 3, 3), Verdict::DeadLetter);

        let timeout = Err(ProcessingError::Timeout(Duration::from_secs(1)));
        assert_eq!(Verdict::classify(&timeout, 1, 3), Verdict::Retry);
    }

    #[test]
    fn test_business_rejections_never_retry() {
        let unauthorized = Err(ProcessingError::Unauthorized {
            id: 1,
            requesting_user: 2,
            author_id: 3,
        });
        assert_eq!(Verdict::classify(&unauthorized, 1, 5), Verdict::Drop);
        assert_eq!(Verdict::classify(&unauthorized, 9, 5), Verdict::Drop);
    }
}
