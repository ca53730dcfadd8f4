use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    PendingProcessing,
    Processed,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::PendingProcessing => write!(f, "pending_processing"),
            DocumentStatus::Processed => write!(f, "processed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_processing" => Ok(DocumentStatus::PendingProcessing),
            "processed" => Ok(DocumentStatus::Processed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("Unknown document status: '{other}'")),
        }
    }
}

/// A scanned invoice or receipt stored as an opaque blob until the external
/// extraction service has looked at it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Option<i64>,
    pub batch_id: Option<i64>,
    pub filename: String,
    pub mime_type: String,
    /// SHA-256 of `file_data`, lowercase hex.
    pub content_hash: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub linked_booking_id: Option<i64>,
    #[serde(skip)]
    pub file_data: Vec<u8>,
}

impl Document {
    pub fn is_pending(&self) -> bool {
        self.linked_booking_id.is_none()
    }
}

/// A single extracted value with an associated confidence score (0.0–1.0).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedField<T> {
    pub value: T,
    pub confidence: f32,
}

impl<T> ExtractedField<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self { value, confidence: confidence.clamp(0.0, 1.0) }
    }
}

/// Structured invoice data as delivered by the document-extraction service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    pub vendor_name: Option<ExtractedField<String>>,
    pub invoice_date: Option<ExtractedField<NaiveDate>>,
    pub invoice_id: Option<ExtractedField<String>>,
    /// Grand total, the amount a payment is matched against.
    pub total: Option<ExtractedField<Money>>,
    pub tax: Option<ExtractedField<Money>>,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_field_clamps_confidence() {
        let f = ExtractedField::new("test", 1.5);
        assert_eq!(f.confidence, 1.0);
        let f = ExtractedField::new("test", -0.1);
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn document_status_roundtrip() {
        use std::str::FromStr;
        for status in [
            DocumentStatus::PendingProcessing,
            DocumentStatus::Processed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }
}
