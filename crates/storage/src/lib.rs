pub mod db;
pub mod memory;
pub mod sqlite;

pub use db::{create_db, get_batch, get_batch_transactions, get_pending_documents, get_unprocessed_transactions, DbPool};
pub use memory::{MemorySession, MemoryStore};
pub use sqlite::{SqliteSession, SqliteStore};
