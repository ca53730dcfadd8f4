//! Persistence contract between the import/reconciliation core and whatever
//! store an embedder plugs in.

use async_trait::async_trait;
use thiserror::Error;

use crate::document::Document;
use crate::transaction::{ImportBatch, Transaction};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Opens one write session per imported file.
#[async_trait]
pub trait ImportStore: Send + Sync {
    type Session: ImportSession;

    /// Starts a session and registers the batch header.
    async fn begin(&self, batch: &ImportBatch) -> Result<Self::Session, StoreError>;
}

/// All writes of one batch. Nothing becomes visible before [`commit`], and a
/// session dropped without committing leaves no trace.
///
/// [`commit`]: ImportSession::commit
#[async_trait]
pub trait ImportSession: Send {
    /// Writes a chunk of rows; the coordinator calls this every `flush_every` rows.
    async fn stage(&mut self, transactions: &[Transaction]) -> Result<(), StoreError>;

    async fn attach_document(&mut self, document: &Document) -> Result<(), StoreError>;

    /// Returns the id assigned to the batch.
    async fn commit(self) -> Result<i64, StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Read side used by the bulk reconciler.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Documents that have no linked booking yet.
    async fn pending_documents(&self) -> Result<Vec<Document>, StoreError>;

    async fn unprocessed_transactions(&self) -> Result<Vec<Transaction>, StoreError>;
}
