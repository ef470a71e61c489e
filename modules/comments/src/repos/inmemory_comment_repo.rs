//! In-memory comment store for tests and local development
//!
//! Follows a single-writer discipline: a transaction owns the store lock for
//! its whole lifetime and works on a staged copy that replaces the committed
//! state only on commit. Applied create keys live in their own ledger and
//! outlive the comments they created.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CommentRecord, CommentStore, CommentTx, InsertOutcome, NewComment, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    rows: BTreeMap<i64, CommentRecord>,
    /// Idempotency key -> id of the comment that key created
    processed: HashMap<Uuid, i64>,
    last_id: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryCommentStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every new transaction (and every commit) fail as if the store
    /// were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    /// All committed comments, ordered by id
    pub async fn all(&self) -> Vec<CommentRecord> {
        self.state
            .lock()
            .await
            .rows
            .values()
            .cloned()
            .collect()
    }
}

struct InMemoryCommentTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    unavailable: Arc<AtomicBool>,
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn begin(&self) -> Result<Box<dyn CommentTx>, StoreError> {
        self.check_available()?;
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryCommentTx {
            guard,
            staged,
            unavailable: self.unavailable.clone(),
        }))
    }

    async fn get(&self, id: i64) -> Result<Option<CommentRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .rows
            .get(&id)
            .cloned())
    }

    async fn list_for_ticket(&self, ticket_id: i64) -> Result<Vec<CommentRecord>, StoreError> {
        self.check_available()?;
        let mut records: Vec<CommentRecord> = self
            .state
            .lock()
            .await
            .rows
            .values()
            .filter(|record| record.ticket_id == ticket_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.creation_date, r.id));
        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[async_trait]
impl CommentTx for InMemoryCommentTx {
    async fn insert(&mut self, comment: &NewComment) -> Result<InsertOutcome, StoreError> {
        if comment.comment_text.is_empty() {
            return Err(StoreError::Constraint("comment_text must not be empty".to_string()));
        }

        if let Some(id) = comment
            .idempotency_key
            .and_then(|key| self.staged.processed.get(&key).copied())
        {
            return Ok(InsertOutcome::Duplicate(id));
        }

        self.staged.last_id += 1;
        let id = self.staged.last_id;
        let record = CommentRecord {
            id,
            comment_text: comment.comment_text.clone(),
            author_id: comment.author_id,
            ticket_id: comment.ticket_id,
            creation_date: comment.creation_date,
        };
        self.staged.rows.insert(id, record);
        if let Some(key) = comment.idempotency_key {
            self.staged.processed.insert(key, id);
        }
        Ok(InsertOutcome::Inserted(id))
    }

    async fn owner_for_update(&mut self, id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.staged.rows.get(&id).map(|record| record.author_id))
    }

    async fn update_text(&mut self, id: i64, comment_text: &str) -> Result<(), StoreError> {
        if comment_text.is_empty() {
            return Err(StoreError::Constraint("comment_text must not be empty".to_string()));
        }
        if let Some(record) = self.staged.rows.get_mut(&id) {
            record.comment_text = comment_text.to_string();
        }
        Ok(())
    }

    async fn delete(&mut self, id: i64) -> Result<(), StoreError> {
        self.staged.rows.remove(&id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryCommentTx {
            mut guard,
            staged,
            unavailable,
        } = *self;

        if unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn new_comment(ticket_id: i64, key: Option<Uuid>) -> NewComment {
        NewComment {
            comment_text: "hello".to_string(),
            author_id: 3,
            ticket_id,
            creation_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            idempotency_key: key,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let store = InMemoryCommentStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert(&new_comment(7, None)).await.unwrap();
        drop(tx);

        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_idempotency_key_deduplicates_inserts() {
        let store = InMemoryCommentStore::new();
        let key = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert(&new_comment(7, Some(key))).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx.insert(&new_comment(7, Some(key))).await.unwrap();
        let third = tx.insert(&new_comment(7, None)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted(1));
        assert_eq!(second, InsertOutcome::Duplicate(1));
        assert_eq!(third, InsertOutcome::Inserted(2));
        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_idempotency_key_outlives_deleted_comment() {
        let store = InMemoryCommentStore::new();
        let key = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert(&new_comment(7, Some(key))).await.unwrap();
        tx.delete(first.id()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let again = tx.insert(&new_comment(7, Some(key))).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(again, InsertOutcome::Duplicate(first.id()));
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_transactions_are_serialized() {
        let store = InMemoryCommentStore::new();
        let tx = store.begin().await.unwrap();

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), store.begin()).await;
        assert!(second.is_err(), "second writer must wait for the first");

        drop(tx);
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_begin_and_commit() {
        let store = InMemoryCommentStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert(&new_comment(1, None)).await.unwrap();
        store.set_unavailable(true);

        assert!(matches!(tx.commit().await, Err(StoreError::Unavailable(_))));
        assert!(store.begin().await.is_err());

        store.set_unavailable(false);
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_for_ticket_filters_and_orders() {
        let store = InMemoryCommentStore::new();
        let mut tx = store.begin().await.unwrap();

        let mut later = new_comment(7, None);
        later.creation_date = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        tx.insert(&later).await.unwrap();
        tx.insert(&new_comment(7, None)).await.unwrap();
        tx.insert(&new_comment(8, None)).await.unwrap();
        tx.commit().await.unwrap();

        let listed = store.list_for_ticket(7).await.unwrap();
        assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
    }
}
