//! Dead Letter Queue (DLQ) handling
//!
//! Events that can never be applied are republished unchanged on
//! `comment.dlq`, with the failure recorded in headers, so they can be
//! inspected and replayed without blocking the main queue.

use event_bus::{BusMessage, BusResult, EventBus};

use crate::contracts::COMMENT_DEAD_LETTER;

pub const ORIGINAL_ROUTING_KEY_HEADER: &str = "x-original-routing-key";
pub const ERROR_HEADER: &str = "x-error";
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

/// Build the dead-letter copy of a failed message
pub fn dead_letter_message(original: &BusMessage, error: &str, delivery_count: u64) -> BusMessage {
    let mut message = BusMessage::new(COMMENT_DEAD_LETTER, original.payload.clone())
        .with_header(ORIGINAL_ROUTING_KEY_HEADER, original.routing_key.clone())
        .with_header(ERROR_HEADER, error)
        .with_header(DELIVERY_COUNT_HEADER, delivery_count.to_string());

    // Keep the producer's message id so a retried dead-letter publish dedups
    if let Some(id) = original.header(event_bus::MESSAGE_ID_HEADER) {
        message = message.with_message_id(format!("dlq-{}", id));
    }

    message
}

/// Republish a failed message on the dead-letter routing key
///
/// Returns the bus error when the dead-letter publish itself fails; the
/// caller must then keep the original delivery alive.
pub async fn send_to_dlq(
    bus: &dyn EventBus,
    exchange: &str,
    original: &BusMessage,
    error: &str,
    delivery_count: u64,
) -> BusResult<()> {
    let message = dead_letter_message(original, error, delivery_count);

    match bus.publish(exchange, message).await {
        Ok(()) => {
            tracing::error!(
                routing_key = %original.routing_key,
                delivery_count = delivery_count,
                error = %error,
                "Event moved to DLQ"
            );
            Ok(())
        }
        Err(dlq_err) => {
            tracing::error!(
                routing_key = %original.routing_key,
                delivery_count = delivery_count,
                error = %error,
                dlq_error = %dlq_err,
                "Failed to publish to DLQ"
            );
            Err(dlq_err)
        }
    }
}
