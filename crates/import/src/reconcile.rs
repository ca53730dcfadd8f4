//! Bulk reconciliation of pending documents against the unprocessed pool.

use std::collections::BTreeMap;

use abschluss_core::{Document, ExtractedInvoice, ReconciliationStore, StoreError, Transaction};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::match_engine::{Confidence, MatchQuery, MatchStatus, MatchingEngine};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Extraction failed for {document}: {reason}")]
    Extraction { document: String, reason: String },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Abstraction over the external document-extraction service.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(&self, document: &Document) -> Result<ExtractedInvoice, ReconcileError>;
}

/// Serves canned extractions keyed by file name. Documents without a fixture
/// fail, so error accounting can be exercised without a real service.
#[derive(Debug, Clone, Default)]
pub struct MockExtractor {
    invoices: BTreeMap<String, ExtractedInvoice>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invoice(mut self, filename: impl Into<String>, invoice: ExtractedInvoice) -> Self {
        self.invoices.insert(filename.into(), invoice);
        self
    }
}

#[async_trait]
impl InvoiceExtractor for MockExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedInvoice, ReconcileError> {
        self.invoices.get(&document.filename).cloned().ok_or_else(|| ReconcileError::Extraction {
            document: document.filename.clone(),
            reason: "no extraction available".into(),
        })
    }
}

/// Turns extracted invoice data into a matching query.
pub trait ToMatchQuery {
    /// `None` when there is no total to match against.
    fn to_query(&self) -> Option<MatchQuery>;
}

impl ToMatchQuery for ExtractedInvoice {
    fn to_query(&self) -> Option<MatchQuery> {
        let total = self.total.as_ref()?;
        let mut query = MatchQuery::new(total.value.as_decimal());
        query.date = self.invoice_date.as_ref().map(|f| f.value);
        query.vendor = self.vendor_name.as_ref().map(|f| f.value.clone()).filter(|v| !v.trim().is_empty());
        query.reference = self.invoice_id.as_ref().map(|f| f.value.clone()).filter(|r| !r.trim().is_empty());
        Some(query)
    }
}

/// Best candidate found for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestMatch {
    pub transaction_id: Option<i64>,
    pub score: f64,
    pub confidence: Confidence,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Candidate(BestMatch),
    NoMatch,
}

/// Per-document processing step the reconciler drives. A booking-suggestion
/// service can supply a richer implementation.
#[async_trait]
pub trait DocumentPipeline: Send + Sync {
    async fn process(&self, document: &Document, pool: &[Transaction]) -> Result<DocumentOutcome, ReconcileError>;
}

/// Extract, build a query, take the best-ranked candidate.
pub struct ExtractionPipeline<E: InvoiceExtractor> {
    extractor: E,
    engine: MatchingEngine,
}

impl<E: InvoiceExtractor> ExtractionPipeline<E> {
    pub fn new(extractor: E, engine: MatchingEngine) -> Self {
        Self { extractor, engine }
    }
}

#[async_trait]
impl<E: InvoiceExtractor> DocumentPipeline for ExtractionPipeline<E> {
    async fn process(&self, document: &Document, pool: &[Transaction]) -> Result<DocumentOutcome, ReconcileError> {
        let invoice = self.extractor.extract(document).await?;
        let Some(query) = invoice.to_query() else {
            debug!(document = %document.filename, "extraction has no total");
            return Ok(DocumentOutcome::NoMatch);
        };
        let best = self.engine.find_matches(&query, pool).into_iter().next();
        Ok(match best {
            Some(candidate) => DocumentOutcome::Candidate(BestMatch {
                transaction_id: candidate.transaction.id,
                score: candidate.score,
                confidence: candidate.confidence,
                status: candidate.status,
            }),
            None => DocumentOutcome::NoMatch,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    pub total_documents: usize,
    /// Documents with at least one candidate.
    pub matched_documents: usize,
    pub high_confidence_matches: usize,
    pub low_confidence_matches: usize,
    pub no_matches: usize,
    pub errors: usize,
}

impl ReconciliationSummary {
    fn record(&mut self, outcome: &DocumentOutcome) {
        match outcome {
            DocumentOutcome::Candidate(best) => {
                self.matched_documents += 1;
                match best.status {
                    MatchStatus::Matched => self.high_confidence_matches += 1,
                    MatchStatus::Suggested => self.low_confidence_matches += 1,
                }
            }
            DocumentOutcome::NoMatch => self.no_matches += 1,
        }
    }
}

pub struct BulkReconciler<S: ReconciliationStore, P: DocumentPipeline> {
    store: S,
    pipeline: P,
}

impl<S: ReconciliationStore, P: DocumentPipeline> BulkReconciler<S, P> {
    pub fn new(store: S, pipeline: P) -> Self {
        Self { store, pipeline }
    }

    /// Runs every pending document through the pipeline. A failing document is
    /// counted in `errors`; only a failing store read aborts the run.
    pub async fn run(&self) -> Result<ReconciliationSummary, ReconcileError> {
        let documents = self.store.pending_documents().await?;
        let pool = self.store.unprocessed_transactions().await?;

        let mut summary = ReconciliationSummary { total_documents: documents.len(), ..Default::default() };
        for document in &documents {
            match self.pipeline.process(document, &pool).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!(document = %document.filename, id = ?document.id, error = %e, "reconciliation failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            total = summary.total_documents,
            matched = summary.matched_documents,
            high = summary.high_confidence_matches,
            low = summary.low_confidence_matches,
            none = summary.no_matches,
            errors = summary.errors,
            "bulk reconciliation finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abschluss_core::{DocumentStatus, ExtractedField, Money};
    use chrono::NaiveDate;

    fn invoice(total_cents: i64) -> ExtractedInvoice {
        ExtractedInvoice {
            vendor_name: Some(ExtractedField::new("ACME".to_string(), 0.9)),
            invoice_date: Some(ExtractedField::new(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), 0.8)),
            invoice_id: Some(ExtractedField::new("2024-001".to_string(), 0.9)),
            total: Some(ExtractedField::new(Money::from_cents(total_cents), 0.95)),
            tax: None,
            confidence: 0.9,
        }
    }

    fn document(filename: &str) -> Document {
        Document {
            id: None,
            batch_id: None,
            filename: filename.into(),
            mime_type: "application/pdf".into(),
            content_hash: String::new(),
            size_bytes: 0,
            status: DocumentStatus::PendingProcessing,
            linked_booking_id: None,
            file_data: Vec::new(),
        }
    }

    #[test]
    fn query_from_invoice() {
        let query = invoice(11_900).to_query().unwrap();
        assert_eq!(query.amount, Money::from_cents(11_900).as_decimal());
        assert_eq!(query.vendor.as_deref(), Some("ACME"));
        assert_eq!(query.reference.as_deref(), Some("2024-001"));
        assert!(ExtractedInvoice::default().to_query().is_none());
    }

    #[tokio::test]
    async fn mock_extractor_fails_without_fixture() {
        let extractor = MockExtractor::new().with_invoice("a.pdf", invoice(100));
        assert!(extractor.extract(&document("a.pdf")).await.is_ok());
        let err = extractor.extract(&document("b.pdf")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Extraction { .. }));
    }

    #[tokio::test]
    async fn pipeline_without_total_is_no_match() {
        let pipeline = ExtractionPipeline::new(
            MockExtractor::new().with_invoice("blank.pdf", ExtractedInvoice::default()),
            MatchingEngine::default(),
        );
        let outcome = pipeline.process(&document("blank.pdf"), &[]).await.unwrap();
        assert_eq!(outcome, DocumentOutcome::NoMatch);
    }

    #[test]
    fn summary_counts_by_status() {
        let mut summary = ReconciliationSummary::default();
        let best = |status| {
            DocumentOutcome::Candidate(BestMatch { transaction_id: Some(1), score: 0.9, confidence: Confidence::VeryHigh, status })
        };
        summary.record(&best(MatchStatus::Matched));
        summary.record(&best(MatchStatus::Suggested));
        summary.record(&DocumentOutcome::NoMatch);
        assert_eq!(summary.matched_documents, 2);
        assert_eq!(summary.high_confidence_matches, 1);
        assert_eq!(summary.low_confidence_matches, 1);
        assert_eq!(summary.no_matches, 1);
    }
}
