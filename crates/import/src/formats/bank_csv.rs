//! German bank export: `;`-separated, no header, eight fixed columns.

use abschluss_core::{SourceType, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

use super::{csv_reader, money, ParseOutput, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;
use crate::locale::GERMAN_DATES;
use crate::util::re;

const COLUMNS: usize = 8;

re!(export_name, r"^Konto_(\d+)_(\d{6})_(\d{6})");
re!(eref, r"EREF:\s*(\S+)");
re!(mref, r"MREF:\s*(\S+)");
re!(iban, r"IBAN:\s*([A-Z]{2}\d{2}[A-Z0-9]+)");
re!(bic, r"BIC:\s*([A-Z]{6}[A-Z0-9]{2,5})");
re!(creditor_id, r"CRED:\s*(\S+)");

/// SEPA tags found in a free-text purpose field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SepaTags {
    pub eref: Option<String>,
    pub mref: Option<String>,
    pub iban: Option<String>,
    pub bic: Option<String>,
    pub creditor_id: Option<String>,
}

impl SepaTags {
    pub fn extract(purpose: &str) -> Self {
        let capture = |pattern: &regex::Regex| pattern.captures(purpose).map(|c| c[1].to_string());
        SepaTags {
            eref: capture(eref()),
            mref: capture(mref()),
            iban: capture(iban()),
            bic: capture(bic()),
            creditor_id: capture(creditor_id()),
        }
    }

    fn write_into(&self, raw: &mut BTreeMap<String, String>) {
        let tags = [
            ("eref", &self.eref),
            ("mref", &self.mref),
            ("iban", &self.iban),
            ("bic", &self.bic),
            ("creditor_id", &self.creditor_id),
        ];
        for (key, value) in tags {
            if let Some(v) = value {
                raw.insert(key.to_string(), v.clone());
            }
        }
    }
}

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let (text, encoding) = source.decode(&settings.encodings.bank)?;
    let mut out = ParseOutput::with_encoding(encoding);
    filename_metadata(&source.file_name, &mut out);

    let mut reader = csv_reader(&text, b';', false);
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.warn(row, format!("unreadable row: {e}"));
                continue;
            }
        };
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        if record.len() < COLUMNS || field(0).is_empty() || field(1).is_empty() || field(2).is_empty() {
            debug!(row, columns = record.len(), "skipping incomplete bank row");
            continue;
        }

        let amount = out.german_amount(row, "amount", field(2));
        let booking_date = out.date(row, "booking date", field(1), GERMAN_DATES);
        let value_date = out.date(row, "value date", field(3), GERMAN_DATES);
        let purpose = field(6);
        let tags = SepaTags::extract(purpose);

        let mut tx = Transaction::new(SourceType::BankCsv, booking_date, money(amount));
        tx.description = purpose.to_string();
        tx.counterparty_name = field(5).to_string();
        tx.account_number = field(7).to_string();
        tx.counter_account_number = tags.iban.clone().unwrap_or_default();
        tx.raw_fields.insert("reference".into(), field(0).to_string());
        if let Some(d) = value_date {
            tx.raw_fields.insert("value_date".into(), d.to_string());
        }
        tags.write_into(&mut tx.raw_fields);
        out.push(tx);
    }

    Ok(out)
}

/// `Konto_<account>_<DDMMYY>_<HHMMSS>.csv` carries account and export time.
fn filename_metadata(file_name: &str, out: &mut ParseOutput) {
    if let Some(caps) = export_name().captures(file_name) {
        out.meta("account_number", &caps[1]);
        let date = &caps[2];
        out.meta("export_date", format!("{}.{}.20{}", &date[0..2], &date[2..4], &date[4..6]));
        out.meta("export_time", &caps[3]);
    }
    out.meta("filename", file_name);
}
