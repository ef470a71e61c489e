//! In-memory implementation of the EventBus trait for testing and development

use crate::delivery::Acker;
use crate::{BusError, BusMessage, BusResult, Delivery, Disposition, EventBus, Topology};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// EventBus implementation using in-process queues
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need fast, isolated brokers
///
/// Exchanges route by exact routing key (direct exchange). Queues are FIFO;
/// a requeued message goes back to the head of its queue. A delivery dropped
/// without being settled is requeued, as a broker would on consumer loss.
///
/// # Example
/// ```rust
/// use event_bus::{BusMessage, EventBus, InMemoryBus, Topology};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// bus.declare(&Topology::new("test-exchange").bind("test-queue", ["test.created"]))
///     .await?;
///
/// let mut deliveries = bus.consume("test-exchange", "test-queue").await?;
/// bus.publish("test-exchange", BusMessage::new("test.created", b"hello".to_vec()))
///     .await?;
///
/// let delivery = deliveries.next().await.unwrap()?;
/// assert_eq!(delivery.message.payload, b"hello");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    /// exchange -> (routing_key, queue) bindings
    exchanges: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, Arc<QueueState>>,
}

struct Pending {
    message: BusMessage,
    deliveries: u64,
}

#[derive(Default)]
struct QueueState {
    ready: Mutex<VecDeque<Pending>>,
    in_flight: AtomicUsize,
    notify: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueState {
    fn enqueue(&self, message: BusMessage) {
        lock(&self.ready).push_back(Pending {
            message,
            deliveries: 0,
        });
        self.notify.notify_one();
    }

    fn take(&self) -> Option<Pending> {
        let mut ready = lock(&self.ready);
        let mut pending = ready.pop_front()?;
        pending.deliveries += 1;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(pending)
    }

    fn requeue(&self, pending: Pending) {
        let mut ready = lock(&self.ready);
        ready.push_front(pending);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(ready);
        self.notify.notify_one();
    }

    fn settled(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InMemoryAcker {
    queue: Arc<QueueState>,
    pending: Option<Pending>,
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn settle(self: Box<Self>, disposition: Disposition) -> BusResult<()> {
        let mut this = self;
        let Some(pending) = this.pending.take() else {
            return Ok(());
        };

        match disposition {
            Disposition::Ack | Disposition::Reject => this.queue.settled(),
            Disposition::Requeue { delay: None } => this.queue.requeue(pending),
            Disposition::Requeue { delay: Some(delay) } => {
                let queue = this.queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.requeue(pending);
                });
            }
        }
        Ok(())
    }
}

impl Drop for InMemoryAcker {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(
                routing_key = %pending.message.routing_key,
                "InMemoryBus: delivery dropped unsettled, requeueing"
            );
            self.queue.requeue(pending);
        }
    }
}

impl InMemoryBus {
    /// Create a new, empty in-memory broker
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_state(&self, queue: &str) -> Option<Arc<QueueState>> {
        lock(&self.registry).queues.get(queue).cloned()
    }

    /// Number of messages waiting to be delivered
    pub fn ready_count(&self, queue: &str) -> usize {
        self.queue_state(queue)
            .map(|q| lock(&q.ready).len())
            .unwrap_or(0)
    }

    /// Number of messages delivered but not yet settled
    pub fn in_flight_count(&self, queue: &str) -> usize {
        self.queue_state(queue)
            .map(|q| q.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// True when the queue holds no ready or unsettled messages
    pub fn is_drained(&self, queue: &str) -> bool {
        self.queue_state(queue)
            .map(|q| {
                let ready = lock(&q.ready);
                ready.is_empty() && q.in_flight.load(Ordering::SeqCst) == 0
            })
            .unwrap_or(true)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn declare(&self, topology: &Topology) -> BusResult<()> {
        let mut registry = lock(&self.registry);
        let Registry { exchanges, queues } = &mut *registry;

        let bindings = exchanges.entry(topology.exchange.clone()).or_default();
        for binding in &topology.queues {
            queues.entry(binding.queue.clone()).or_default();
            for key in &binding.routing_keys {
                let pair = (key.clone(), binding.queue.clone());
                if !bindings.contains(&pair) {
                    bindings.push(pair);
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: BusMessage) -> BusResult<()> {
        let targets: Vec<Arc<QueueState>> = {
            let registry = lock(&self.registry);
            let bindings = registry.exchanges.get(exchange).ok_or_else(|| {
                BusError::PublishError(format!("exchange {} is not declared", exchange))
            })?;
            bindings
                .iter()
                .filter(|(key, _)| *key == message.routing_key)
                .filter_map(|(_, queue)| registry.queues.get(queue).cloned())
                .collect()
        };

        if targets.is_empty() {
            return Err(BusError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: message.routing_key,
            });
        }

        for queue in targets {
            queue.enqueue(message.clone());
        }
        Ok(())
    }

    async fn consume(
        &self,
        exchange: &str,
        queue: &str,
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        let state = {
            let registry = lock(&self.registry);
            let bound = registry
                .exchanges
                .get(exchange)
                .map(|b| b.iter().any(|(_, q)| q == queue))
                .unwrap_or(false);
            if !bound {
                return Err(BusError::ConsumeError(format!(
                    "queue {} is not bound to exchange {}",
                    queue, exchange
                )));
            }
            registry
                .queues
                .get(queue)
                .cloned()
                .ok_or_else(|| BusError::ConsumeError(format!("queue {} is not declared", queue)))?
        };

        let stream = async_stream::stream! {
            loop {
                let pending = loop {
                    if let Some(pending) = state.take() {
                        break pending;
                    }
                    state.notify.notified().await;
                };

                let message = pending.message.clone();
                let deliveries = pending.deliveries;
                let acker = InMemoryAcker {
                    queue: state.clone(),
                    pending: Some(pending),
                };
                yield Ok(Delivery::new(message, deliveries, Box::new(acker)));
            }
        };

        Ok(stream.boxed())
    }
}
