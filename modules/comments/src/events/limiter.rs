//! Backpressure for the producer gateway
//!
//! Every publish holds a [`PublishPermit`] while it talks to the broker. When
//! the broker slows down, permits run out and new submissions wait up to the
//! configured bound before failing with [`Saturated`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// No permit became free within the configured wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all {capacity} publish slots busy for {waited:?}")]
pub struct Saturated {
    pub capacity: usize,
    pub waited: Duration,
}

/// Held for the duration of one publish; the slot frees on drop
#[derive(Debug)]
pub struct PublishPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Clone)]
pub struct PublishLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
    max_wait: Duration,
}

impl PublishLimiter {
    pub fn new(max_in_flight: usize, acquire_timeout_ms: u64) -> Self {
        let capacity = max_in_flight.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_wait: Duration::from_millis(acquire_timeout_ms.max(1)),
        }
    }

    pub async fn acquire(&self) -> Result<PublishPermit, Saturated> {
        let saturated = Saturated {
            capacity: self.capacity,
            waited: self.max_wait,
        };

        // The semaphore is never closed, so an acquire error only means timeout
        match tokio::time::timeout(self.max_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(PublishPermit { _permit: permit }),
            Ok(Err(_)) | Err(_) => Err(saturated),
        }
    }

    /// Publishes currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_fails_with_bound_when_exhausted() {
        let limiter = PublishLimiter::new(1, 10);
        let held = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);

        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(
            err,
            Saturated {
                capacity: 1,
                waited: Duration::from_millis(10)
            }
        );

        drop(held);
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_submission_gets_freed_slot() {
        let limiter = PublishLimiter::new(1, 1000);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }
}
