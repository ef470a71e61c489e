pub mod limiter;
pub mod publisher;

pub use limiter::{PublishLimiter, Saturated};
pub use publisher::{CommentEventPublisher, MutationIntent, PublishError, Submitted};
