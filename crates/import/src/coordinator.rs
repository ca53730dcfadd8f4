//! One call imports one file: detect, parse, then persist as a single batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use abschluss_core::{ImportBatch, ImportSession, ImportStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::decode::Encoding;
use crate::detect::{file_name, Format};
use crate::error::{ImportError, RowWarning};
use crate::formats::{self, ParseOutput, SourceFile};

/// Optional account details the caller knows but the file does not carry.
/// Stored as given; IBAN checksums are not verified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerMetadata {
    pub account_name: Option<String>,
    pub iban: Option<String>,
    pub bic: Option<String>,
}

impl CallerMetadata {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [("account_name", &self.account_name), ("iban", &self.iban), ("bic", &self.bic)]
            .into_iter()
            .filter_map(|(key, value)| {
                let value = value.as_deref()?.trim();
                (!value.is_empty()).then_some((key, value))
            })
    }
}

/// Outcome of a committed import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub batch: ImportBatch,
    pub format: Format,
    pub encoding: Option<Encoding>,
    pub warnings: Vec<RowWarning>,
    pub dropped_zero_rows: usize,
}

impl ImportReport {
    pub fn batch_id(&self) -> Option<i64> {
        self.batch.id
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

pub struct Importer<S: ImportStore> {
    store: S,
    settings: Arc<Settings>,
}

impl<S: ImportStore> Importer<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Self { store, settings: Arc::new(settings) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn import_file(
        &self,
        path: &Path,
        caller: Option<&CallerMetadata>,
    ) -> Result<ImportReport, ImportError> {
        let file = file_name(path);
        let format = Format::detect(path).ok_or_else(|| ImportError::UnsupportedFormat { file: file.clone() })?;
        info!(file = %file, format = %format, "importing file");

        let parsed = self.parse_blocking(path.to_path_buf(), format, &file).await?;
        let batch = build_batch(format, &file, &parsed, caller);

        if !parsed.warnings.is_empty() {
            warn!(file = %file, warnings = parsed.warnings.len(), "rows skipped or defaulted");
        }

        let batch_id = self.persist(&file, &batch, &parsed).await?;
        info!(file = %file, batch_id, rows = batch.transaction_count, "batch committed");

        Ok(ImportReport {
            batch: ImportBatch { id: Some(batch_id), ..batch },
            format,
            encoding: parsed.encoding,
            warnings: parsed.warnings,
            dropped_zero_rows: parsed.dropped_zero_rows,
        })
    }

    /// Reading and row parsing are synchronous; they run off the async workers.
    async fn parse_blocking(&self, path: PathBuf, format: Format, file: &str) -> Result<ParseOutput, ImportError> {
        let settings = Arc::clone(&self.settings);
        tokio::task::spawn_blocking(move || {
            let source = SourceFile::read(&path)?;
            formats::parse(format, &source, &settings)
        })
        .await
        .map_err(|e| ImportError::Aborted { file: file.to_string(), reason: e.to_string() })?
    }

    async fn persist(&self, file: &str, batch: &ImportBatch, parsed: &ParseOutput) -> Result<i64, ImportError> {
        let persistence = |source: StoreError| ImportError::Persistence { file: file.to_string(), source };

        let mut session = self.store.begin(batch).await.map_err(persistence)?;
        match write_all(&mut session, parsed, self.settings.import.flush_every, file).await {
            Ok(()) => session.commit().await.map_err(persistence),
            Err(e) => {
                warn!(file, error = %e, "persisting failed, rolling back batch");
                if let Err(rollback) = session.rollback().await {
                    warn!(file, error = %rollback, "rollback failed");
                }
                Err(persistence(e))
            }
        }
    }
}

async fn write_all<T: ImportSession>(
    session: &mut T,
    parsed: &ParseOutput,
    flush_every: usize,
    file: &str,
) -> Result<(), StoreError> {
    let mut written = 0usize;
    for chunk in parsed.transactions.chunks(flush_every.max(1)) {
        session.stage(chunk).await?;
        written += chunk.len();
        debug!(file, written, total = parsed.transactions.len(), "flushed rows");
    }
    for document in &parsed.documents {
        session.attach_document(document).await?;
    }
    Ok(())
}

fn build_batch(format: Format, file: &str, parsed: &ParseOutput, caller: Option<&CallerMetadata>) -> ImportBatch {
    let source_type = format.source_type();
    let mut batch = ImportBatch::new(source_type, file);
    batch.metadata = parsed.metadata.clone();
    batch.metadata.insert("format".into(), format.name().into());
    if let Some(encoding) = parsed.encoding {
        batch.metadata.insert("encoding".into(), encoding.label().into());
    }
    if let Some(caller) = caller.filter(|_| source_type.accepts_account_metadata()) {
        for (key, value) in caller.entries() {
            batch.metadata.insert(key.into(), value.into());
        }
    }
    // A passthrough document counts as one record.
    batch.transaction_count = if parsed.documents.is_empty() {
        parsed.transactions.len()
    } else {
        parsed.documents.len()
    };
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use abschluss_core::SourceType;

    fn parsed_with_rows(n: usize) -> ParseOutput {
        use abschluss_core::{Money, Transaction};
        let mut out = ParseOutput::with_encoding(Encoding::Utf8);
        for i in 0..n {
            out.push(Transaction::new(SourceType::Paypal, None, Money::from_cents(100 + i as i64)));
        }
        out
    }

    #[test]
    fn caller_metadata_merges_for_provider_batches() {
        let caller = CallerMetadata {
            account_name: Some("PayPal Geschäftskonto".into()),
            iban: Some("  ".into()),
            bic: None,
        };
        let batch = build_batch(Format::Paypal, "paypal.csv", &parsed_with_rows(2), Some(&caller));
        assert_eq!(batch.metadata.get("account_name").map(String::as_str), Some("PayPal Geschäftskonto"));
        assert!(!batch.metadata.contains_key("iban"));
        assert_eq!(batch.metadata.get("encoding").map(String::as_str), Some("utf-8"));
        assert_eq!(batch.transaction_count, 2);
    }

    #[test]
    fn caller_metadata_ignored_for_datev() {
        let caller = CallerMetadata { account_name: Some("Bank".into()), ..Default::default() };
        let batch = build_batch(Format::Datev, "buchungen.csv", &ParseOutput::default(), Some(&caller));
        assert!(!batch.metadata.contains_key("account_name"));
        assert_eq!(batch.source_type, SourceType::Datev);
    }
}
