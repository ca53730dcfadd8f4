//! Stripe payments export (unified payments CSV).

use abschluss_core::{SourceType, Transaction};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::warn;

use super::{csv_reader, delimiter_by_majority, money, read_headers, ParseOutput, Row, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;
use crate::locale::{self, ISO_DATES};

pub const ACCOUNT: &str = "STRIPE";

const METADATA_SUFFIX: &str = " (metadata)";
const SUCCESS_STATUSES: &[&str] = &["succeeded", "paid"];
const MAX_PRODUCTS: usize = 3;

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let file = source.file_name.as_str();
    let (text, encoding) = source.decode(&settings.encodings.provider)?;
    let delimiter = delimiter_by_majority(&text);

    let mut out = ParseOutput::with_encoding(encoding);
    out.meta("payment_provider", "Stripe");
    out.meta("account_type", "payment_processor");
    out.meta("filename", file);
    out.meta("delimiter", char::from(delimiter).to_string());

    let mut reader = csv_reader(&text, delimiter, true);
    let headers = read_headers(&mut reader, file)?;
    let mut cents_rows = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let row_no = idx + 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.warn(row_no, format!("unreadable row: {e}"));
                continue;
            }
        };
        let row = Row::new(&headers, &record);
        if row.is_blank() {
            continue;
        }

        let mut row_in_cents = false;
        let mut amount_of = |field: &str| match locale::parse_cents_or_decimal(row.get(field)) {
            Ok(a) => {
                row_in_cents |= a.from_cents;
                a.value
            }
            Err(e) => {
                out.warn(row_no, format!("{field}: {e}"));
                Decimal::ZERO
            }
        };
        let amount = amount_of("Amount");
        let refunded = amount_of("Amount Refunded");
        let fee = amount_of("Fee");

        let status = row.get("Status");
        if amount.is_zero() && status.is_empty() {
            continue;
        }
        if row_in_cents {
            cents_rows += 1;
        }

        let booking_date = out.date(row_no, "Created date (UTC)", row.get("Created date (UTC)"), ISO_DATES);
        let net = amount - fee - refunded;
        let succeeded = SUCCESS_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(status));

        let metadata = metadata_columns(&headers, &record);
        let email = row.get("Customer Email");
        let mut tx = Transaction::new(SourceType::Stripe, booking_date, money(net));
        tx.description = description(&row, &metadata);
        tx.counterparty_name = email.to_string();
        tx.account_number = ACCOUNT.to_string();
        tx.raw_fields = row
            .fields()
            .into_iter()
            .filter(|(k, _)| !k.ends_with(METADATA_SUFFIX))
            .collect();
        tx.raw_fields.insert("gross_amount".into(), amount.to_string());
        tx.raw_fields.insert("fee".into(), fee.to_string());
        tx.raw_fields.insert("is_successful".into(), succeeded.to_string());
        for (key, value) in metadata {
            tx.raw_fields.insert(format!("metadata.{key}"), value);
        }

        if succeeded {
            out.push(tx);
        } else {
            out.push_failure_audit(tx);
        }
    }

    if cents_rows > 0 {
        warn!(file, cents_rows, "integer amounts above 999 read as cents");
    }
    out.meta("cents_heuristic_rows", cents_rows.to_string());
    Ok(out)
}

/// Columns named `<key> (metadata)` with a value, keyed by `<key>`.
fn metadata_columns(headers: &[String], record: &::csv::StringRecord) -> BTreeMap<String, String> {
    headers
        .iter()
        .zip(record.iter())
        .filter_map(|(h, v)| {
            let key = h.strip_suffix(METADATA_SUFFIX)?;
            let v = v.trim();
            (!v.is_empty()).then(|| (key.to_string(), v.to_string()))
        })
        .collect()
}

fn description(row: &Row<'_>, metadata: &BTreeMap<String, String>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let desc = row.get("Description");
    if !desc.is_empty() {
        parts.push(desc.to_string());
    }
    for (label, field) in [("Statement", "Statement Descriptor"), ("Customer", "Customer Email"), ("Stripe ID", "id")] {
        let value = row.get(field);
        if !value.is_empty() {
            parts.push(format!("{label}: {value}"));
        }
    }
    let products: Vec<&str> = metadata
        .iter()
        .filter(|(k, _)| k.starts_with("product_"))
        .map(|(_, v)| v.as_str())
        .take(MAX_PRODUCTS)
        .collect();
    if !products.is_empty() {
        parts.push(format!("Products: {}", products.join(", ")));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use abschluss_core::Money;
    use chrono::NaiveDate;

    const HEADER: &str = "id,Created date (UTC),Amount,Amount Refunded,Currency,Captured,Fee,Status,Description,Customer Email,Statement Descriptor,product_1 (metadata),product_2 (metadata)\n";

    fn parse_csv(body: &str) -> ParseOutput {
        let text = format!("{HEADER}{body}");
        parse(&SourceFile::new("unified_payments.csv", text.into_bytes()), &Settings::default()).unwrap()
    }

    #[test]
    fn integer_above_999_is_cents() {
        let out = parse_csv("ch_1,2024-03-01 10:00:00,1500,0,eur,true,0,Paid,Order,a@b.de,SHOP,,\n");
        assert_eq!(out.transactions[0].amount, Money::from_cents(1_500));
        assert_eq!(out.metadata.get("cents_heuristic_rows").map(String::as_str), Some("1"));
    }

    #[test]
    fn cents_heuristic_counts_rows_not_fields() {
        let out = parse_csv(
            "ch_1,2024-03-01 10:00:00,5000,1000,eur,true,1200,Paid,Order,,,,\n\
             ch_2,2024-03-02 10:00:00,12.00,0,eur,true,0,Paid,Order,,,,\n",
        );
        assert_eq!(out.transactions[0].amount, Money::from_cents(2_800));
        assert_eq!(out.metadata.get("cents_heuristic_rows").map(String::as_str), Some("1"));
    }

    #[test]
    fn decimal_amount_is_unchanged() {
        let out = parse_csv("ch_2,2024-03-01 10:00:00,15.00,0,eur,true,0,succeeded,Order,,,,\n");
        assert_eq!(out.transactions[0].amount, Money::from_cents(1_500));
        assert_eq!(out.metadata.get("cents_heuristic_rows").map(String::as_str), Some("0"));
    }

    #[test]
    fn net_subtracts_fee_and_refund() {
        let out = parse_csv("ch_3,2024-03-01T08:30:00Z,100.00,20.00,eur,true,3.20,succeeded,Abo,k@x.de,SHOP,Basic,Addon\n");
        let tx = &out.transactions[0];
        assert_eq!(tx.amount, Money::from_cents(7_680));
        assert_eq!(tx.booking_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(tx.counterparty_name, "k@x.de");
        assert_eq!(tx.account_number, ACCOUNT);
        assert_eq!(
            tx.description,
            "Abo | Statement: SHOP | Customer: k@x.de | Stripe ID: ch_3 | Products: Basic, Addon"
        );
        assert_eq!(tx.raw("metadata.product_1"), Some("Basic"));
        assert_eq!(tx.raw("product_1 (metadata)"), None);
    }

    #[test]
    fn failed_rows_are_kept_for_audit() {
        let out = parse_csv("ch_4,2024-03-02 09:00:00,49.00,0,eur,false,0,failed,Order 9,,,,\n");
        assert_eq!(out.transactions.len(), 1);
        let tx = &out.transactions[0];
        assert!(tx.amount.is_zero());
        assert!(tx.description.starts_with("[FAILED] Order 9"));
        assert_eq!(tx.raw("is_successful"), Some("false"));
    }

    #[test]
    fn zero_amount_without_status_is_skipped() {
        let out = parse_csv("ch_5,2024-03-02 09:00:00,0,0,eur,false,0,,,,,,\n");
        assert!(out.transactions.is_empty());
    }

    #[test]
    fn semicolon_majority_switches_delimiter() {
        let text = "id;Created date (UTC);Amount;Fee;Status;Description\nch_6;2024-03-03;12,50;0,30;paid;Kauf, klein\n";
        let out = parse(&SourceFile::new("stripe.csv", text.as_bytes().to_vec()), &Settings::default()).unwrap();
        assert_eq!(out.transactions[0].amount, Money::from_cents(1_220));
        assert_eq!(out.metadata.get("delimiter").map(String::as_str), Some(";"));
    }
}
