//! [`ImportStore`] and [`ReconciliationStore`] over a SQLite pool.

use abschluss_core::{
    Document, ImportBatch, ImportSession, ImportStore, ReconciliationStore, StoreError, Transaction,
};
use async_trait::async_trait;
use sqlx::Sqlite;
use std::path::Path;
use tracing::debug;

use crate::db::{self, DbPool, DATE_FORMAT};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) and migrates the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        Ok(Self::new(db::create_db(path).await?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Every write of one batch runs inside a single database transaction.
/// Dropping the session without [`ImportSession::commit`] rolls it back.
pub struct SqliteSession {
    tx: sqlx::Transaction<'static, Sqlite>,
    batch_id: i64,
    rows: usize,
    documents: usize,
}

#[async_trait]
impl ImportStore for SqliteStore {
    type Session = SqliteSession;

    async fn begin(&self, batch: &ImportBatch) -> Result<Self::Session, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let metadata = serde_json::to_string(&batch.metadata).map_err(StoreError::backend)?;

        let result = sqlx::query(
            "INSERT INTO import_batches (source_type, source_file_name, import_date, metadata, transaction_count) \
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(batch.source_type.as_str())
        .bind(&batch.source_file_name)
        .bind(batch.import_date.to_rfc3339())
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        let batch_id = result.last_insert_rowid();
        debug!(batch_id, file = %batch.source_file_name, "batch opened");
        Ok(SqliteSession { tx, batch_id, rows: 0, documents: 0 })
    }
}

#[async_trait]
impl ImportSession for SqliteSession {
    async fn stage(&mut self, transactions: &[Transaction]) -> Result<(), StoreError> {
        for transaction in transactions {
            let t = transaction.bounded_for_storage();
            let cents = t
                .amount
                .to_cents()
                .ok_or_else(|| StoreError::Rejected(format!("amount {} out of range", t.amount)))?;
            let raw_fields = serde_json::to_string(&t.raw_fields).map_err(StoreError::backend)?;

            sqlx::query(
                "INSERT INTO imported_transactions (batch_id, source_type, booking_date, amount_cents, description, \
                 counterparty_name, account_number, counter_account_number, raw_fields, processed) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(self.batch_id)
            .bind(t.source_type.as_str())
            .bind(t.booking_date.map(|d| d.format(DATE_FORMAT).to_string()))
            .bind(cents)
            .bind(&t.description)
            .bind(&t.counterparty_name)
            .bind(&t.account_number)
            .bind(&t.counter_account_number)
            .bind(raw_fields)
            .bind(t.processed)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        }
        self.rows += transactions.len();
        Ok(())
    }

    async fn attach_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let size = i64::try_from(document.size_bytes)
            .map_err(|_| StoreError::Rejected(format!("{} is too large", document.filename)))?;
        sqlx::query(
            "INSERT INTO documents (batch_id, filename, mime_type, content_hash, size_bytes, status, \
             linked_booking_id, file_data) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.batch_id)
        .bind(&document.filename)
        .bind(&document.mime_type)
        .bind(&document.content_hash)
        .bind(size)
        .bind(document.status.to_string())
        .bind(document.linked_booking_id)
        .bind(&document.file_data)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        self.documents += 1;
        Ok(())
    }

    async fn commit(mut self) -> Result<i64, StoreError> {
        let count = i64::try_from(self.rows + self.documents).unwrap_or(i64::MAX);
        sqlx::query("UPDATE import_batches SET transaction_count = ? WHERE id = ?")
            .bind(count)
            .bind(self.batch_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        self.tx.commit().await.map_err(StoreError::backend)?;
        Ok(self.batch_id)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!(batch_id = self.batch_id, "batch rolled back");
        self.tx.rollback().await.map_err(StoreError::backend)
    }
}

#[async_trait]
impl ReconciliationStore for SqliteStore {
    async fn pending_documents(&self) -> Result<Vec<Document>, StoreError> {
        db::get_pending_documents(&self.pool).await.map_err(StoreError::backend)
    }

    async fn unprocessed_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        db::get_unprocessed_transactions(&self.pool).await.map_err(StoreError::backend)
    }
}
