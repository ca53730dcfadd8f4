use abschluss_core::{
    Document, DocumentStatus, ImportBatch, ImportSession, ImportStore, Money, ReconciliationStore, SourceType,
    Transaction, MAX_DESCRIPTION_CHARS,
};
use abschluss_storage::{get_batch, get_batch_transactions, SqliteStore};
use chrono::NaiveDate;

async fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("abschluss.db")).await.unwrap()
}

fn bank_row(cents: i64, description: &str) -> Transaction {
    let mut tx = Transaction::new(SourceType::BankCsv, NaiveDate::from_ymd_opt(2024, 3, 1), Money::from_cents(cents));
    tx.description = description.to_string();
    tx.counterparty_name = "ACME GmbH".into();
    tx.raw_fields.insert("eref".into(), "X1".into());
    tx
}

#[tokio::test]
async fn committed_batch_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let mut batch = ImportBatch::new(SourceType::BankCsv, "Konto_1234567_010324_101500.csv");
    batch.metadata.insert("account_number".into(), "1234567".into());

    let mut session = store.begin(&batch).await.unwrap();
    session.stage(&[bank_row(-11_900, "Invoice 2024-001")]).await.unwrap();
    session.stage(&[bank_row(2_500, &"x".repeat(700))]).await.unwrap();
    let id = session.commit().await.unwrap();

    let stored = get_batch(store.pool(), id).await.unwrap().unwrap();
    assert_eq!(stored.transaction_count, 2);
    assert_eq!(stored.source_type, SourceType::BankCsv);
    assert_eq!(stored.metadata.get("account_number").map(String::as_str), Some("1234567"));

    let rows = get_batch_transactions(store.pool(), id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].amount, Money::from_cents(-11_900));
    assert_eq!(rows[0].booking_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    assert_eq!(rows[0].raw("eref"), Some("X1"));
    assert_eq!(rows[1].description.chars().count(), MAX_DESCRIPTION_CHARS);

    assert_eq!(store.unprocessed_transactions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rolled_back_batch_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let mut session = store.begin(&ImportBatch::new(SourceType::Stripe, "stripe.csv")).await.unwrap();
    session.stage(&[bank_row(100, "a")]).await.unwrap();
    session.rollback().await.unwrap();

    assert!(get_batch(store.pool(), 1).await.unwrap().is_none());
    assert!(store.unprocessed_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_session_is_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    {
        let mut session = store.begin(&ImportBatch::new(SourceType::Mollie, "mollie.csv")).await.unwrap();
        session.stage(&[bank_row(100, "a")]).await.unwrap();
    }

    assert!(store.unprocessed_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn attached_document_is_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let document = Document {
        id: None,
        batch_id: None,
        filename: "rechnung.pdf".into(),
        mime_type: "application/pdf".into(),
        content_hash: "ab".repeat(32),
        size_bytes: 4,
        status: DocumentStatus::PendingProcessing,
        linked_booking_id: None,
        file_data: b"%PDF".to_vec(),
    };
    let mut session = store.begin(&ImportBatch::new(SourceType::Pdf, "rechnung.pdf")).await.unwrap();
    session.attach_document(&document).await.unwrap();
    let id = session.commit().await.unwrap();

    let pending = store.pending_documents().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].batch_id, Some(id));
    assert_eq!(pending[0].file_data, b"%PDF");
    assert_eq!(pending[0].status, DocumentStatus::PendingProcessing);
    assert_eq!(get_batch(store.pool(), id).await.unwrap().unwrap().transaction_count, 1);
}
