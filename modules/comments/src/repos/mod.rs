//! Persistent store for comment records
//!
//! The consumer only ever mutates comments through a [`CommentTx`]: the
//! ownership read and the mutation it authorizes run inside one unit of work,
//! so no other mutation of the same row can interleave between them.
//! Dropping a transaction without committing it discards its changes.

pub mod inmemory_comment_repo;
pub mod pg_comment_repo;

pub use inmemory_comment_repo::InMemoryCommentStore;
pub use pg_comment_repo::PgCommentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A persisted comment
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CommentRecord {
    pub id: i64,
    pub comment_text: String,
    pub author_id: i64,
    pub ticket_id: i64,
    pub creation_date: DateTime<Utc>,
}

/// Fields of a comment about to be inserted; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub comment_text: String,
    pub author_id: i64,
    pub ticket_id: i64,
    pub creation_date: DateTime<Utc>,
    /// Unique per logical create; `None` disables deduplication
    pub idempotency_key: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// The idempotency key was applied before; carries the id it created,
    /// even if that comment has since been deleted
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn id(self) -> i64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// The store refused the data itself; retrying cannot succeed
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Constraint(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        // SQLSTATE class 22 (data exception) and 23 (integrity violation)
        let constraint = error
            .as_database_error()
            .and_then(|db| db.code().map(|code| (code.into_owned(), db.message().to_string())))
            .filter(|(code, _)| code.starts_with("22") || code.starts_with("23"));

        match constraint {
            Some((code, message)) => StoreError::Constraint(format!("{}: {}", code, message)),
            None => StoreError::Database(error),
        }
    }
}

/// Entry point to the comment store
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> Result<Box<dyn CommentTx>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<CommentRecord>, StoreError>;

    /// Comments attached to a ticket, oldest first
    async fn list_for_ticket(&self, ticket_id: i64) -> Result<Vec<CommentRecord>, StoreError>;

    /// Cheap reachability check for readiness probes
    async fn ping(&self) -> Result<(), StoreError>;
}

/// A single unit of work against the comment store
#[async_trait]
pub trait CommentTx: Send {
    async fn insert(&mut self, comment: &NewComment) -> Result<InsertOutcome, StoreError>;

    /// Author of the comment, locking the row until commit or rollback
    async fn owner_for_update(&mut self, id: i64) -> Result<Option<i64>, StoreError>;

    async fn update_text(&mut self, id: i64, comment_text: &str) -> Result<(), StoreError>;

    async fn delete(&mut self, id: i64) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
