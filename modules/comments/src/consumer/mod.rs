pub mod comment_consumer;

pub use comment_consumer::{start_comment_consumers, CommentConsumer, ConsumerSettings, Verdict};
