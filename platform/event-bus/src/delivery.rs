//! Consumed messages and their settlement

use crate::{BusMessage, BusResult};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Terminal decision for a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing succeeded; remove the message from the queue
    Ack,
    /// Transient failure; return the message to the queue for redelivery,
    /// optionally after a delay
    Requeue { delay: Option<Duration> },
    /// Permanent failure; remove the message without redelivery
    Reject,
}

/// Broker-specific settlement of a single delivery
#[async_trait]
pub(crate) trait Acker: Send + Sync {
    async fn settle(self: Box<Self>, disposition: Disposition) -> BusResult<()>;
}

/// A message handed to a consumer
///
/// The message stays owned by the broker until the delivery is settled.
/// Settling consumes the delivery, so it can happen at most once.
pub struct Delivery {
    pub message: BusMessage,
    /// How many times this message has been delivered, including this one
    pub delivery_count: u64,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub(crate) fn new(message: BusMessage, delivery_count: u64, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            delivery_count,
            acker,
        }
    }

    /// True if the broker has delivered this message before
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    pub async fn settle(self, disposition: Disposition) -> BusResult<()> {
        self.acker.settle(disposition).await
    }

    pub async fn ack(self) -> BusResult<()> {
        self.settle(Disposition::Ack).await
    }

    pub async fn requeue(self, delay: Option<Duration>) -> BusResult<()> {
        self.settle(Disposition::Requeue { delay }).await
    }

    pub async fn reject(self) -> BusResult<()> {
        self.settle(Disposition::Reject).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.message.routing_key)
            .field("payload_len", &self.message.payload.len())
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}
