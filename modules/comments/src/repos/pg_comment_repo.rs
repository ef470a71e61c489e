//! Postgres-backed comment store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{CommentRecord, CommentStore, CommentTx, InsertOutcome, NewComment, StoreError};

#[derive(Clone)]
pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PgCommentTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn begin(&self) -> Result<Box<dyn CommentTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCommentTx { tx }))
    }

    async fn get(&self, id: i64) -> Result<Option<CommentRecord>, StoreError> {
        let record = sqlx::query_as::<_, CommentRecord>(
            r#"
            SELECT id, comment_text, author_id, ticket_id, creation_date
            FROM comment
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_for_ticket(&self, ticket_id: i64) -> Result<Vec<CommentRecord>, StoreError> {
        let records = sqlx::query_as::<_, CommentRecord>(
            r#"
            SELECT id, comment_text, author_id, ticket_id, creation_date
            FROM comment
            WHERE ticket_id = $1
            ORDER BY creation_date, id
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CommentTx for PgCommentTx {
    async fn insert(&mut self, comment: &NewComment) -> Result<InsertOutcome, StoreError> {
        let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('comment', 'id'))")
            .fetch_one(&mut *self.tx)
            .await?;

        if let Some(key) = comment.idempotency_key {
            // Blocks on a concurrent claim of the same key until that tx ends
            let claimed: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO comment_processed_event (event_id, comment_id)
                VALUES ($1, $2)
                ON CONFLICT (event_id) DO NOTHING
                RETURNING comment_id
                "#,
            )
            .bind(key)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

            if claimed.is_none() {
                let existing: i64 = sqlx::query_scalar(
                    "SELECT comment_id FROM comment_processed_event WHERE event_id = $1",
                )
                .bind(key)
                .fetch_one(&mut *self.tx)
                .await?;
                return Ok(InsertOutcome::Duplicate(existing));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO comment (id, comment_text, author_id, ticket_id, creation_date, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&comment.comment_text)
        .bind(comment.author_id)
        .bind(comment.ticket_id)
        .bind(comment.creation_date)
        .bind(comment.idempotency_key)
        .execute(&mut *self.tx)
        .await?;

        Ok(InsertOutcome::Inserted(id))
    }

    async fn owner_for_update(&mut self, id: i64) -> Result<Option<i64>, StoreError> {
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT author_id FROM comment WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(owner)
    }

    async fn update_text(&mut self, id: i64, comment_text: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE comment SET comment_text = $1 WHERE id = $2")
            .bind(comment_text)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn delete(&mut self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM comment WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}
