//! In-process store with the same commit/rollback semantics as SQLite.

use abschluss_core::{
    Document, ImportBatch, ImportSession, ImportStore, ReconciliationStore, StoreError, Transaction,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    batches: Vec<ImportBatch>,
    transactions: Vec<Transaction>,
    documents: Vec<Document>,
    next_batch_id: i64,
    next_row_id: i64,
}

/// Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    /// 1-based index of the staged chunk that is rejected.
    fail_on_chunk: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose sessions reject the `n`-th staged chunk.
    pub fn failing_on_chunk(n: usize) -> Self {
        Self { fail_on_chunk: Some(n), ..Self::default() }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Rejected("memory store lock poisoned".into()))
    }

    pub fn batches(&self) -> Vec<ImportBatch> {
        self.tables().map(|t| t.batches.clone()).unwrap_or_default()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.tables().map(|t| t.transactions.clone()).unwrap_or_default()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.tables().map(|t| t.documents.clone()).unwrap_or_default()
    }

    pub fn batch_transactions(&self, batch_id: i64) -> Vec<Transaction> {
        self.transactions().into_iter().filter(|t| t.batch_id == Some(batch_id)).collect()
    }
}

pub struct MemorySession {
    tables: Arc<Mutex<Tables>>,
    batch: ImportBatch,
    transactions: Vec<Transaction>,
    documents: Vec<Document>,
    chunks: usize,
    fail_on_chunk: Option<usize>,
}

#[async_trait]
impl ImportStore for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self, batch: &ImportBatch) -> Result<Self::Session, StoreError> {
        Ok(MemorySession {
            tables: Arc::clone(&self.tables),
            batch: batch.clone(),
            transactions: Vec::new(),
            documents: Vec::new(),
            chunks: 0,
            fail_on_chunk: self.fail_on_chunk,
        })
    }
}

#[async_trait]
impl ImportSession for MemorySession {
    async fn stage(&mut self, transactions: &[Transaction]) -> Result<(), StoreError> {
        self.chunks += 1;
        if self.fail_on_chunk == Some(self.chunks) {
            return Err(StoreError::Rejected(format!("chunk {} rejected", self.chunks)));
        }
        self.transactions.extend(transactions.iter().map(Transaction::bounded_for_storage));
        Ok(())
    }

    async fn attach_document(&mut self, document: &Document) -> Result<(), StoreError> {
        self.documents.push(document.clone());
        Ok(())
    }

    async fn commit(self) -> Result<i64, StoreError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Rejected("memory store lock poisoned".into()))?;

        tables.next_batch_id += 1;
        let batch_id = tables.next_batch_id;
        let count = self.transactions.len() + self.documents.len();

        for mut transaction in self.transactions {
            tables.next_row_id += 1;
            transaction.id = Some(tables.next_row_id);
            transaction.batch_id = Some(batch_id);
            tables.transactions.push(transaction);
        }
        for mut document in self.documents {
            tables.next_row_id += 1;
            document.id = Some(tables.next_row_id);
            document.batch_id = Some(batch_id);
            tables.documents.push(document);
        }
        tables.batches.push(ImportBatch { id: Some(batch_id), transaction_count: count, ..self.batch });
        Ok(batch_id)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn pending_documents(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self.tables()?.documents.iter().filter(|d| d.is_pending()).cloned().collect())
    }

    async fn unprocessed_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.tables()?.transactions.iter().filter(|t| !t.processed).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abschluss_core::{Money, SourceType};

    fn row(cents: i64) -> Transaction {
        Transaction::new(SourceType::BankCsv, None, Money::from_cents(cents))
    }

    #[tokio::test]
    async fn nothing_visible_before_commit() {
        let store = MemoryStore::new();
        let mut session = store.begin(&ImportBatch::new(SourceType::BankCsv, "konto.csv")).await.unwrap();
        session.stage(&[row(100), row(-200)]).await.unwrap();
        assert!(store.transactions().is_empty());

        let id = session.commit().await.unwrap();
        assert_eq!(store.batch_transactions(id).len(), 2);
        assert_eq!(store.batches()[0].transaction_count, 2);
    }

    #[tokio::test]
    async fn injected_failure_and_rollback_leave_no_trace() {
        let store = MemoryStore::failing_on_chunk(2);
        let mut session = store.begin(&ImportBatch::new(SourceType::BankCsv, "konto.csv")).await.unwrap();
        session.stage(&[row(100)]).await.unwrap();
        assert!(session.stage(&[row(200)]).await.is_err());
        session.rollback().await.unwrap();
        assert!(store.batches().is_empty());
        assert!(store.transactions().is_empty());
    }
}
