//! DATEV document export: header-driven, German column names.

use abschluss_core::{SourceType, Transaction};
use tracing::debug;

use super::{csv_reader, money, read_headers, unwrap_quoted_lines, ParseOutput, Row, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;
use crate::locale::GERMAN_DATES;

const DOCUMENT_TYPE: &str = "Belegart";
const PARTNER: &str = "Geschäftspartner-Name";
const AMOUNT: &str = "Rechnungsbetrag";

const DATE_COLUMNS: &[&str] = &["Rechnungsdatum", "Belegdatum", "Datum"];
const NUMBER_COLUMNS: &[&str] = &["Rechnungsnummer", "Rechnungs-Nr.", "Belegnummer", "Belegnr."];
const TEXT_COLUMNS: &[&str] = &["Buchungstext", "Beschreibung", "Bemerkung"];
const PARTNER_ACCOUNT_COLUMNS: &[&str] = &["Geschäftspartner-Konto", "Konto"];
const CONTRA_COLUMNS: &[&str] = &["Gegenkonto", "Sachkonto"];

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let file = source.file_name.as_str();
    let (text, encoding) = source.decode(&settings.encodings.datev_export)?;
    let text = match unwrap_quoted_lines(&text, b';') {
        Some(unwrapped) => {
            debug!(file, "document export was wrapped in outer quotes");
            unwrapped
        }
        None => text,
    };

    let mut out = ParseOutput::with_encoding(encoding);
    out.meta("datev_format", "document_export");

    let mut reader = csv_reader(&text, b';', true);
    let headers = read_headers(&mut reader, file)?;
    if !headers.iter().any(|h| h == DOCUMENT_TYPE) || !headers.iter().any(|h| h == AMOUNT) {
        return Err(ImportError::malformed(file, format!("header lacks '{DOCUMENT_TYPE}' or '{AMOUNT}'")));
    }

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

        let document_type = row.get(DOCUMENT_TYPE);
        if document_type.is_empty() {
            continue;
        }

        let mut amount = out.german_amount(row_no, AMOUNT, row.get(AMOUNT));
        if settings.datev.is_income_code(document_type) {
            amount = -amount.abs();
        }
        let date_raw = first_of(&row, DATE_COLUMNS);
        let booking_date = out.date(row_no, "Rechnungsdatum", date_raw, GERMAN_DATES);

        let number = first_of(&row, NUMBER_COLUMNS);
        let text = first_of(&row, TEXT_COLUMNS);
        let mut tx = Transaction::new(SourceType::Datev, booking_date, money(amount));
        tx.counterparty_name = row.get(PARTNER).to_string();
        tx.description = if text.is_empty() {
            [document_type, number].iter().filter(|s| !s.is_empty()).copied().collect::<Vec<_>>().join(" ")
        } else {
            text.to_string()
        };
        tx.account_number = first_of(&row, PARTNER_ACCOUNT_COLUMNS).to_string();
        tx.counter_account_number = first_of(&row, CONTRA_COLUMNS).to_string();
        tx.raw_fields = row.fields();
        out.push(tx);
    }

    Ok(out)
}

fn first_of<'a>(row: &Row<'a>, names: &[&str]) -> &'a str {
    names.iter().map(|n| row.get(n)).find(|v| !v.is_empty()).unwrap_or("")
}
