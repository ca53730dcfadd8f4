use abschluss_core::{BatchMetadata, Document, DocumentStatus, ImportBatch, Money, SourceType, Transaction};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_type TEXT NOT NULL,
            source_file_name TEXT NOT NULL,
            import_date TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            transaction_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imported_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER NOT NULL,
            source_type TEXT NOT NULL,
            booking_date TEXT,
            amount_cents INTEGER NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            counterparty_name TEXT NOT NULL DEFAULT '',
            account_number TEXT NOT NULL DEFAULT '',
            counter_account_number TEXT NOT NULL DEFAULT '',
            raw_fields TEXT NOT NULL DEFAULT '{}',
            processed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (batch_id) REFERENCES import_batches(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            status TEXT NOT NULL,
            linked_booking_id INTEGER,
            file_data BLOB NOT NULL,
            FOREIGN KEY (batch_id) REFERENCES import_batches(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_imported_transactions_batch ON imported_transactions(batch_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_imported_transactions_processed ON imported_transactions(processed)")
        .execute(pool)
        .await?;

    Ok(())
}

type BatchRow = (i64, String, String, String, String, i64);

type TransactionRow = (i64, i64, String, Option<String>, i64, String, String, String, String, String, i64);

type DocumentRow = (i64, Option<i64>, String, String, String, i64, String, Option<i64>, Vec<u8>);

pub(crate) const TRANSACTION_COLUMNS: &str = "id, batch_id, source_type, booking_date, amount_cents, description, \
     counterparty_name, account_number, counter_account_number, raw_fields, processed";

pub(crate) const DOCUMENT_COLUMNS: &str =
    "id, batch_id, filename, mime_type, content_hash, size_bytes, status, linked_booking_id, file_data";

pub async fn get_batch(pool: &DbPool, id: i64) -> Result<Option<ImportBatch>, sqlx::Error> {
    let row = sqlx::query_as::<_, BatchRow>(
        "SELECT id, source_type, source_file_name, import_date, metadata, transaction_count FROM import_batches WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(batch_from_row).transpose()
}

pub async fn get_batch_transactions(pool: &DbPool, batch_id: i64) -> Result<Vec<Transaction>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM imported_transactions WHERE batch_id = ? ORDER BY id"
    ))
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(transaction_from_row).collect()
}

pub async fn get_unprocessed_transactions(pool: &DbPool) -> Result<Vec<Transaction>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM imported_transactions WHERE processed = 0 ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(transaction_from_row).collect()
}

pub async fn get_pending_documents(pool: &DbPool) -> Result<Vec<Document>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE linked_booking_id IS NULL ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(document_from_row).collect()
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn batch_from_row(r: BatchRow) -> Result<ImportBatch, sqlx::Error> {
    let source_type = SourceType::from_str(&r.1).map_err(decode_error)?;
    let import_date = DateTime::parse_from_rfc3339(&r.3)
        .map_err(|e| decode_error(format!("import_date '{}': {e}", r.3)))?
        .with_timezone(&Utc);
    let metadata: BatchMetadata = serde_json::from_str(&r.4).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(ImportBatch {
        id: Some(r.0),
        source_type,
        source_file_name: r.2,
        import_date,
        metadata,
        transaction_count: usize::try_from(r.5).unwrap_or_default(),
    })
}

fn transaction_from_row(r: TransactionRow) -> Result<Transaction, sqlx::Error> {
    let source_type = SourceType::from_str(&r.2).map_err(decode_error)?;
    let booking_date = r
        .3
        .map(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).map_err(|e| decode_error(format!("booking_date '{d}': {e}"))))
        .transpose()?;
    let raw_fields: BTreeMap<String, String> =
        serde_json::from_str(&r.9).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Transaction {
        id: Some(r.0),
        batch_id: Some(r.1),
        source_type,
        booking_date,
        amount: Money::from_cents(r.4),
        description: r.5,
        counterparty_name: r.6,
        account_number: r.7,
        counter_account_number: r.8,
        raw_fields,
        processed: r.10 != 0,
    })
}

fn document_from_row(r: DocumentRow) -> Result<Document, sqlx::Error> {
    let status = DocumentStatus::from_str(&r.6).map_err(decode_error)?;
    Ok(Document {
        id: Some(r.0),
        batch_id: r.1,
        filename: r.2,
        mime_type: r.3,
        content_hash: r.4,
        size_bytes: u64::try_from(r.5).unwrap_or_default(),
        status,
        linked_booking_id: r.7,
        file_data: r.8,
    })
}
