//! DATEV classic booking batch (`EXTF`): two metadata rows, then fixed positions.

use abschluss_core::{SourceType, Transaction};
use chrono::{Datelike, NaiveDate, Utc};
use tracing::debug;

use super::{csv_reader, money, ParseOutput, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;

const MIN_COLUMNS: usize = 10;
/// Position of the fiscal-year start (`YYYYMMDD`) in the `EXTF` header row.
const FISCAL_YEAR_START: usize = 12;

const AMOUNT: usize = 0;
const DEBIT_CREDIT: usize = 1;
const ACCOUNT: usize = 2;
const CONTRA_ACCOUNT: usize = 3;
const DATE: usize = 4;
const DOCUMENT_REF: usize = 5;
const DESCRIPTION: usize = 7;
const TAX_KEY: usize = 8;

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let (text, encoding) = source.decode(&settings.encodings.datev)?;
    let mut out = ParseOutput::with_encoding(encoding);
    out.meta("datev_format", "classic");

    let mut reader = csv_reader(&text, b';', false);
    let mut records = reader.records();

    let header = records.next().and_then(Result::ok);
    let fiscal_year = header
        .as_ref()
        .and_then(|h| h.get(FISCAL_YEAR_START))
        .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y%m%d").ok())
        .map(|d| d.year());
    let year = fiscal_year
        .or(settings.datev.fallback_year)
        .unwrap_or_else(|| Utc::now().year());
    if let Some(y) = fiscal_year {
        out.meta("fiscal_year", y.to_string());
    }
    // Column captions.
    let _ = records.next();

    for (idx, result) in records.enumerate() {
        let row = idx + 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.warn(row, format!("unreadable row: {e}"));
                continue;
            }
        };
        if record.len() < MIN_COLUMNS {
            debug!(row, columns = record.len(), "skipping short DATEV row");
            continue;
        }
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let amount = out.german_amount(row, "Umsatz", field(AMOUNT));
        let booking_date = match parse_datev_date(field(DATE), year) {
            Ok(d) => d,
            Err(raw) => {
                out.warn(row, format!("Belegdatum: unrecognized date '{raw}'"));
                None
            }
        };

        let (debit, credit) = if field(DEBIT_CREDIT).eq_ignore_ascii_case("S") {
            (field(ACCOUNT), field(CONTRA_ACCOUNT))
        } else {
            (field(CONTRA_ACCOUNT), field(ACCOUNT))
        };

        let mut tx = Transaction::new(SourceType::Datev, booking_date, money(amount));
        tx.description = field(DESCRIPTION).to_string();
        tx.account_number = debit.to_string();
        tx.counter_account_number = credit.to_string();
        for (key, col) in [("debit_credit", DEBIT_CREDIT), ("document_ref", DOCUMENT_REF), ("tax_key", TAX_KEY)] {
            if !field(col).is_empty() {
                tx.raw_fields.insert(key.to_string(), field(col).to_string());
            }
        }
        out.push(tx);
    }

    Ok(out)
}

/// `DDMM` (year supplied by the caller) or `DDMMYYYY`. Leading zeros dropped
/// by spreadsheet round-trips are restored. Blank is `Ok(None)`.
fn parse_datev_date(raw: &str, year: i32) -> Result<Option<NaiveDate>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(raw.to_string());
    }
    let padded = match raw.len() {
        3 | 7 => format!("0{raw}"),
        _ => raw.to_string(),
    };
    let num = |range: std::ops::Range<usize>| padded[range].parse::<u32>().ok();
    let date = match padded.len() {
        4 => num(0..2).zip(num(2..4)).and_then(|(d, m)| NaiveDate::from_ymd_opt(year, m, d)),
        8 => {
            let y = padded[4..8].parse::<i32>().ok();
            num(0..2)
                .zip(num(2..4))
                .zip(y)
                .and_then(|((d, m), y)| NaiveDate::from_ymd_opt(y, m, d))
        }
        _ => None,
    };
    date.map(Some).ok_or_else(|| raw.to_string())
}
