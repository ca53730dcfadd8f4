//! PayPal activity download with German headers. Net amount is canonical.

use abschluss_core::{SourceType, Transaction};

use super::{csv_reader, delimiter_from_header, money, read_headers, ParseOutput, Row, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;
use crate::locale::PAYPAL_DATES;

pub const ACCOUNT: &str = "PAYPAL";

/// `Typ` values describing currency conversions rather than payments.
const CONVERSION_TYPES: &[&str] = &["Allgemeine Währungsumrechnung", "Währungsumrechnung"];

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let file = source.file_name.as_str();
    let (text, encoding) = source.decode(&settings.encodings.provider)?;
    let delimiter = delimiter_from_header(&text);

    let mut out = ParseOutput::with_encoding(encoding);
    out.meta("payment_provider", "PayPal");
    out.meta("account_type", "payment_provider");
    out.meta("filename", file);

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

        let kind = row.get("Typ");
        if CONVERSION_TYPES.contains(&kind) {
            continue;
        }

        let gross = out.amount(row_no, "Brutto", row.get("Brutto"));
        let fee = out.amount(row_no, "Gebühr", row.get("Gebühr"));
        let net = out.amount(row_no, "Netto", row.get("Netto"));
        if gross.is_zero() && net.is_zero() {
            continue;
        }

        let when = match row.get("Uhrzeit") {
            "" => row.get("Datum").to_string(),
            time => format!("{} {time}", row.get("Datum")),
        };
        let booking_date = out.date(row_no, "Datum", &when, PAYPAL_DATES);

        let partner = row.get("Name");
        let mut tx = Transaction::new(SourceType::Paypal, booking_date, money(net));
        tx.description = description(kind, row.get("Betreff"), partner, row.get("Transaktionscode"));
        tx.counterparty_name = partner.to_string();
        tx.account_number = ACCOUNT.to_string();
        tx.raw_fields = row.fields();
        tx.raw_fields.insert("partner_name".into(), partner.to_string());
        tx.raw_fields.insert("gross_amount".into(), gross.to_string());
        tx.raw_fields.insert("fee".into(), fee.to_string());
        tx.raw_fields.entry("Währung".into()).or_insert_with(|| "EUR".into());
        out.push(tx);
    }

    Ok(out)
}

fn description(kind: &str, subject: &str, partner: &str, code: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for plain in [kind, subject] {
        if !plain.is_empty() {
            parts.push(plain.to_string());
        }
    }
    if !partner.is_empty() {
        parts.push(format!("Partner: {partner}"));
    }
    if !code.is_empty() {
        parts.push(format!("ID: {code}"));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use abschluss_core::Money;
    use chrono::NaiveDate;

    const CSV: &str = "\"Datum\",\"Uhrzeit\",\"Zeitzone\",\"Name\",\"Typ\",\"Status\",\"Währung\",\"Brutto\",\"Gebühr\",\"Netto\",\"Transaktionscode\",\"Betreff\"\n\
\"01.03.2024\",\"10:15:00\",\"CET\",\"ACME GmbH\",\"Zahlung im Einzugsverfahren mit Zahlungsrechnung\",\"Abgeschlossen\",\"EUR\",\"-119,00\",\"0,00\",\"-119,00\",\"5TY0\",\"Rechnung 2024-001\"\n\
\"01.03.2024\",\"10:15:01\",\"CET\",\"\",\"Allgemeine Währungsumrechnung\",\"Abgeschlossen\",\"USD\",\"130,00\",\"0,00\",\"130,00\",\"5TY1\",\"\"\n\
\"02.03.2024\",\"\",\"CET\",\"Kunde\",\"Handyzahlung\",\"Abgeschlossen\",\"EUR\",\"50,00\",\"-1,75\",\"48,25\",\"5TY2\",\"\"\n\
\"03.03.2024\",\"\",\"CET\",\"Null\",\"Info\",\"Abgeschlossen\",\"EUR\",\"0,00\",\"0,00\",\"0,00\",\"5TY3\",\"\"\n";

    fn parse_csv(text: &str) -> ParseOutput {
        parse(&SourceFile::new("paypal.csv", text.as_bytes().to_vec()), &Settings::default()).unwrap()
    }

    #[test]
    fn conversion_and_empty_rows_are_dropped() {
        let out = parse_csv(CSV);
        let codes: Vec<_> = out.transactions.iter().filter_map(|t| t.raw("Transaktionscode")).collect();
        assert_eq!(codes, vec!["5TY0", "5TY2"]);
    }

    #[test]
    fn net_amount_and_description() {
        let out = parse_csv(CSV);
        let first = &out.transactions[0];
        assert_eq!(first.amount, Money::from_cents(-11_900));
        assert_eq!(first.booking_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(first.account_number, ACCOUNT);
        assert_eq!(
            first.description,
            "Zahlung im Einzugsverfahren mit Zahlungsrechnung | Rechnung 2024-001 | Partner: ACME GmbH | ID: 5TY0"
        );
        assert_eq!(first.raw("partner_name"), Some("ACME GmbH"));

        let second = &out.transactions[1];
        assert_eq!(second.amount, Money::from_cents(4_825));
        assert_eq!(second.raw("fee"), Some("-1.75"));
        assert_eq!(second.raw("gross_amount"), Some("50.00"));
    }

    #[test]
    fn semicolon_export_is_detected() {
        let text = "Datum;Uhrzeit;Name;Typ;Brutto;Gebühr;Netto;Transaktionscode\n05.03.2024;08:00:00;Shop;Zahlung;-9,99;0;-9,99;X1\n";
        let out = parse_csv(text);
        assert_eq!(out.transactions.len(), 1);
        assert_eq!(out.transactions[0].amount, Money::from_cents(-999));
        assert_eq!(out.metadata.get("payment_provider").map(String::as_str), Some("PayPal"));
    }
}
