use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::money::Money;

pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_COUNTERPARTY_CHARS: usize = 100;
pub const MAX_ACCOUNT_CHARS: usize = 20;

/// Prefix marking a payment-provider row kept only for audit of a failed event.
pub const FAILED_MARKER: &str = "[FAILED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    BankCsv,
    BankXml,
    Datev,
    Paypal,
    Stripe,
    Mollie,
    Pdf,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::BankCsv => "BANK_CSV",
            SourceType::BankXml => "BANK_XML",
            SourceType::Datev => "DATEV",
            SourceType::Paypal => "PAYPAL",
            SourceType::Stripe => "STRIPE",
            SourceType::Mollie => "MOLLIE",
            SourceType::Pdf => "PDF",
        }
    }

    pub fn is_payment_provider(self) -> bool {
        matches!(self, SourceType::Paypal | SourceType::Stripe | SourceType::Mollie)
    }

    /// Bank and payment-provider imports accept caller-supplied account metadata.
    pub fn accepts_account_metadata(self) -> bool {
        matches!(self, SourceType::BankCsv | SourceType::BankXml) || self.is_payment_provider()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BANK_CSV" => Ok(SourceType::BankCsv),
            "BANK_XML" => Ok(SourceType::BankXml),
            "DATEV" => Ok(SourceType::Datev),
            "PAYPAL" => Ok(SourceType::Paypal),
            "STRIPE" => Ok(SourceType::Stripe),
            "MOLLIE" => Ok(SourceType::Mollie),
            "PDF" => Ok(SourceType::Pdf),
            other => Err(format!("Unknown source type: '{other}'")),
        }
    }
}

/// Canonical record every row parser produces.
///
/// `amount` is negative for outflows and positive for inflows, after any
/// source-specific sign normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub batch_id: Option<i64>,
    pub source_type: SourceType,
    pub booking_date: Option<NaiveDate>,
    pub amount: Money,
    pub description: String,
    pub counterparty_name: String,
    pub account_number: String,
    pub counter_account_number: String,
    /// Original field names and values, kept for audit.
    pub raw_fields: BTreeMap<String, String>,
    pub processed: bool,
}

impl Transaction {
    pub fn new(source_type: SourceType, booking_date: Option<NaiveDate>, amount: Money) -> Self {
        Transaction {
            id: None,
            batch_id: None,
            source_type,
            booking_date,
            amount,
            description: String::new(),
            counterparty_name: String::new(),
            account_number: String::new(),
            counter_account_number: String::new(),
            raw_fields: BTreeMap::new(),
            processed: false,
        }
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.raw_fields.get(key).map(String::as_str)
    }

    pub fn is_failure_audit(&self) -> bool {
        self.amount.is_zero() && self.description.starts_with(FAILED_MARKER)
    }

    /// Rewrites the row as an audit record of a failed provider event:
    /// amount forced to zero, description prefixed with [`FAILED_MARKER`].
    pub fn into_failure_audit(mut self) -> Self {
        self.amount = Money::zero();
        if !self.description.starts_with(FAILED_MARKER) {
            self.description = format!("{FAILED_MARKER} {}", self.description);
        }
        self
    }

    /// Copy with every bounded text field cut to its column width.
    pub fn bounded_for_storage(&self) -> Transaction {
        Transaction {
            description: truncate_chars(&self.description, MAX_DESCRIPTION_CHARS),
            counterparty_name: truncate_chars(&self.counterparty_name, MAX_COUNTERPARTY_CHARS),
            account_number: truncate_chars(&self.account_number, MAX_ACCOUNT_CHARS),
            counter_account_number: truncate_chars(&self.counter_account_number, MAX_ACCOUNT_CHARS),
            ..self.clone()
        }
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub type BatchMetadata = BTreeMap<String, String>;

/// One imported file. Append-only once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Option<i64>,
    pub source_type: SourceType,
    pub source_file_name: String,
    pub import_date: DateTime<Utc>,
    pub metadata: BatchMetadata,
    pub transaction_count: usize,
}

impl ImportBatch {
    pub fn new(source_type: SourceType, source_file_name: impl Into<String>) -> Self {
        ImportBatch {
            id: None,
            source_type,
            source_file_name: source_file_name.into(),
            import_date: Utc::now(),
            metadata: BatchMetadata::new(),
            transaction_count: 0,
        }
    }
}
