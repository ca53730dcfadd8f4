pub mod document;
pub mod money;
pub mod period;
pub mod store;
pub mod transaction;

pub use document::{Document, DocumentStatus, ExtractedField, ExtractedInvoice};
pub use money::Money;
pub use period::{days_between, DateRange};
pub use store::{ImportSession, ImportStore, ReconciliationStore, StoreError};
pub use transaction::{
    truncate_chars, BatchMetadata, ImportBatch, SourceType, Transaction, FAILED_MARKER,
    MAX_ACCOUNT_CHARS, MAX_COUNTERPARTY_CHARS, MAX_DESCRIPTION_CHARS,
};
