//! Mollie payments / settlement export with English headers.

use abschluss_core::{SourceType, Transaction};
use rust_decimal::Decimal;

use super::{csv_reader, delimiter_from_header, money, read_headers, ParseOutput, Row, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;
use crate::locale::MOLLIE_DATES;

pub const ACCOUNT: &str = "MOLLIE";

const SUCCESS_STATUSES: &[&str] = &["paid", "settled", "authorized"];
/// Statuses that need no mention in the description.
const ROUTINE_STATUSES: &[&str] = &["paid", "settled"];

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let file = source.file_name.as_str();
    let (text, encoding) = source.decode(&settings.encodings.provider)?;
    let delimiter = delimiter_from_header(&text);

    let mut out = ParseOutput::with_encoding(encoding);
    out.meta("payment_provider", "Mollie");
    out.meta("account_type", "payment_processor");
    out.meta("filename", file);
    if let Some(id) = settlement_id(file) {
        out.meta("settlement_id", id);
    }

    let mut reader = csv_reader(&text, delimiter, true);
    let headers = read_headers(&mut reader, file)?;

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

        let amount = out.amount(row_no, "Amount", row.get("Amount"));
        let settlement = out.amount(row_no, "Settlement amount", row.get("Settlement amount"));
        let refunded = out.amount(row_no, "Amount refunded", row.get("Amount refunded"));
        if amount.is_zero() && settlement.is_zero() {
            continue;
        }

        let booking_date = out.date(row_no, "Date", row.get("Date"), MOLLIE_DATES);
        let status = row.get("Status");
        let (mut net, fee) = if settlement.is_zero() {
            (amount, Decimal::ZERO)
        } else {
            (settlement, amount - settlement)
        };
        if refunded > Decimal::ZERO && net > Decimal::ZERO {
            net = -net;
        }
        let succeeded = SUCCESS_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(status));

        let consumer = row.get("Consumer name");
        let mut tx = Transaction::new(SourceType::Mollie, booking_date, money(net));
        tx.description = description(&row, status);
        tx.counterparty_name = consumer.to_string();
        tx.account_number = ACCOUNT.to_string();
        tx.counter_account_number = row.get("Consumer bank account").to_string();
        tx.raw_fields = row.fields();
        tx.raw_fields.insert("gross_amount".into(), amount.to_string());
        tx.raw_fields.insert("settlement_amount".into(), settlement.to_string());
        tx.raw_fields.insert("fee".into(), fee.to_string());
        tx.raw_fields.insert("is_successful".into(), succeeded.to_string());
        out.push(tx);
    }

    Ok(out)
}

/// `mollie-settlement<ID>.csv` names carry the settlement id.
fn settlement_id(file_name: &str) -> Option<String> {
    let lower = file_name.to_lowercase();
    let (_, rest) = lower.split_once("settlement")?;
    let id = rest.split('.').next().unwrap_or_default();
    let id = id.trim_matches(|c: char| c == '_' || c == '-' || c == ' ');
    (!id.is_empty()).then(|| id.to_string())
}

fn description(row: &Row<'_>, status: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut labelled = |label: &str, field: &str| {
        let value = row.get(field);
        if !value.is_empty() {
            parts.push(if label.is_empty() { value.to_string() } else { format!("{label}: {value}") });
        }
    };
    labelled("Method", "Payment method");
    labelled("", "Description");
    labelled("From", "Consumer name");
    labelled("Mollie ID", "ID");
    labelled("Settlement", "Settlement reference");
    if !status.is_empty() && !ROUTINE_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(status)) {
        parts.push(format!("Status: {status}"));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use abschluss_core::Money;
    use chrono::NaiveDate;

    const HEADER: &str = "ID,Date,Amount,Settlement amount,Amount refunded,Currency,Status,Payment method,Description,Consumer name,Consumer bank account,Settlement reference\n";

    fn parse_named(name: &str, body: &str) -> ParseOutput {
        let text = format!("{HEADER}{body}");
        parse(&SourceFile::new(name, text.into_bytes()), &Settings::default()).unwrap()
    }

    #[test]
    fn settlement_amount_is_canonical() {
        let out = parse_named(
            "mollie-settlement_ST123.csv",
            "tr_1,2024-03-01 12:00:00,100.00,98.71,0,EUR,paid,ideal,Order 1,Jan Jansen,NL91ABNA0417164300,ST123\n",
        );
        let tx = &out.transactions[0];
        assert_eq!(tx.amount, Money::from_cents(9_871));
        assert_eq!(tx.raw("fee"), Some("1.29"));
        assert_eq!(tx.booking_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(tx.counterparty_name, "Jan Jansen");
        assert_eq!(tx.account_number, ACCOUNT);
        assert_eq!(
            tx.description,
            "Method: ideal | Order 1 | From: Jan Jansen | Mollie ID: tr_1 | Settlement: ST123"
        );
        assert_eq!(out.metadata.get("settlement_id").map(String::as_str), Some("st123"));
    }

    #[test]
    fn gross_used_without_settlement_and_refunds_negated() {
        let out = parse_named(
            "mollie.csv",
            "tr_2,01-03-2024,25.00,0,0,EUR,open,creditcard,Order 2,,,\n\
             tr_3,2024-03-02,40.00,0,40.00,EUR,refunded,ideal,Order 3,,,\n",
        );
        assert_eq!(out.transactions[0].amount, Money::from_cents(2_500));
        assert!(out.transactions[0].description.ends_with("Status: open"));
        assert_eq!(out.transactions[0].raw("is_successful"), Some("false"));
        assert_eq!(out.transactions[1].amount, Money::from_cents(-4_000));
        assert!(out.metadata.get("settlement_id").is_none());
    }

    #[test]
    fn zero_rows_are_skipped() {
        let out = parse_named("mollie.csv", "tr_4,2024-03-02,0,0,0,EUR,paid,ideal,,,,\n");
        assert!(out.transactions.is_empty());
    }

    #[test]
    fn settlement_id_from_name() {
        assert_eq!(settlement_id("Mollie_settlement12345.csv").as_deref(), Some("12345"));
        assert_eq!(settlement_id("mollie.csv"), None);
    }
}
