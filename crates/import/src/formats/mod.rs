//! Row parsers, one module per source family, plus the plumbing they share.

pub mod bank_csv;
pub mod bank_xml;
pub mod datev;
pub mod datev_export;
pub mod document;
pub mod mollie;
pub mod paypal;
pub mod stripe;

use abschluss_core::{BatchMetadata, Document, Money, Transaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Settings;
use crate::decode::{self, DecodeError, Encoding};
use crate::detect::{file_name, Format};
use crate::error::{ImportError, RowWarning};
use crate::locale;

/// A file read fully into memory, ready for decoding.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        let file_name = file_name(&path);
        Self { path, file_name, bytes }
    }

    pub fn read(path: &Path) -> Result<Self, ImportError> {
        let bytes = std::fs::read(path).map_err(|source| ImportError::Io {
            file: file_name(path),
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(path, bytes))
    }

    /// Decodes the whole file with the first candidate that fits.
    pub fn decode(&self, candidates: &[Encoding]) -> Result<(String, Encoding), ImportError> {
        decode_named(&self.file_name, &self.bytes, candidates)
    }
}

pub(crate) fn decode_named(
    file: &str,
    bytes: &[u8],
    candidates: &[Encoding],
) -> Result<(String, Encoding), ImportError> {
    match decode::decode(bytes, candidates) {
        Ok((text, encoding)) => {
            debug!(file, %encoding, "decoded file");
            Ok((text, encoding))
        }
        Err(DecodeError::Exhausted { tried }) => {
            Err(ImportError::DecodingExhausted { file: file.to_string(), tried })
        }
    }
}

/// Result of parsing one file: the rows that parsed plus everything that did not.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub transactions: Vec<Transaction>,
    pub documents: Vec<Document>,
    pub warnings: Vec<RowWarning>,
    pub metadata: BatchMetadata,
    pub encoding: Option<Encoding>,
    /// Zero-amount rows removed by [`ParseOutput::push`].
    pub dropped_zero_rows: usize,
}

impl ParseOutput {
    pub fn with_encoding(encoding: Encoding) -> Self {
        Self { encoding: Some(encoding), ..Self::default() }
    }

    /// Adds a parsed row unless its amount is zero. Returns whether it was kept.
    pub fn push(&mut self, transaction: Transaction) -> bool {
        if transaction.amount.is_zero() {
            self.dropped_zero_rows += 1;
            return false;
        }
        self.transactions.push(transaction);
        true
    }

    /// Keeps a failed provider event as a zero-amount audit row.
    pub fn push_failure_audit(&mut self, transaction: Transaction) {
        self.transactions.push(transaction.into_failure_audit());
    }

    pub fn warn(&mut self, row: usize, message: impl Into<String>) {
        let warning = RowWarning { row, message: message.into() };
        debug!(row = warning.row, message = %warning.message, "row warning");
        self.warnings.push(warning);
    }

    pub fn meta(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.metadata.insert(key.to_string(), value);
        }
    }

    /// Locale decimal; an unparsable value warns and yields zero.
    pub(crate) fn amount(&mut self, row: usize, field: &str, raw: &str) -> Decimal {
        locale::parse_decimal(raw).unwrap_or_else(|e| {
            self.warn(row, format!("{field}: {e}"));
            Decimal::ZERO
        })
    }

    /// German bank and DATEV amount; an unparsable value warns and yields zero.
    pub(crate) fn german_amount(&mut self, row: usize, field: &str, raw: &str) -> Decimal {
        locale::parse_german_decimal(raw).unwrap_or_else(|e| {
            self.warn(row, format!("{field}: {e}"));
            Decimal::ZERO
        })
    }

    /// Date from the first matching pattern; an unparsable value warns and yields `None`.
    pub(crate) fn date(&mut self, row: usize, field: &str, raw: &str, formats: &[&str]) -> Option<NaiveDate> {
        locale::parse_date(raw, formats).unwrap_or_else(|e| {
            self.warn(row, format!("{field}: {e}"));
            None
        })
    }
}

/// Dispatches to the row parser for `format`.
pub fn parse(format: Format, source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    match format {
        Format::BankCsv => bank_csv::parse(source, settings),
        Format::BankXml => bank_xml::parse(source, settings),
        Format::Paypal => paypal::parse(source, settings),
        Format::Stripe => stripe::parse(source, settings),
        Format::Mollie => mollie::parse(source, settings),
        Format::Document => document::parse(source),
        Format::Datev => match crate::detect::sniff_datev_layout(&source.bytes) {
            crate::detect::DatevLayout::Classic => datev::parse(source, settings),
            crate::detect::DatevLayout::DocumentExport => datev_export::parse(source, settings),
        },
    }
}

pub(crate) fn money(value: Decimal) -> Money {
    Money::from_decimal(value)
}

// ── CSV plumbing ──────────────────────────────────────────────────────────────

/// `;` when the header line has semicolons and no commas, else `,`.
/// Only the header is inspected; German decimals put commas in data rows.
pub(crate) fn delimiter_from_header(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    if header.contains(';') && !header.contains(',') {
        b';'
    } else {
        b','
    }
}

/// Whichever of `;` and `,` occurs more often in the sample; ties go to `,`.
pub(crate) fn delimiter_by_majority(text: &str) -> u8 {
    let sample = sample(text);
    if sample.matches(';').count() > sample.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn sample(text: &str) -> &str {
    match text.char_indices().nth(1024) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub(crate) fn csv_reader(text: &str, delimiter: u8, has_headers: bool) -> ::csv::Reader<&[u8]> {
    ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// Header names stripped of BOM, quotes, escape backslashes and whitespace.
pub(crate) fn normalize_header(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .trim()
        .trim_matches(|c| c == '"' || c == '\\' || c == '\'')
        .trim()
        .to_string()
}

/// One CSV row addressed by normalized header name.
pub(crate) struct Row<'a> {
    headers: &'a [String],
    record: &'a ::csv::StringRecord,
}

impl<'a> Row<'a> {
    pub(crate) fn new(headers: &'a [String], record: &'a ::csv::StringRecord) -> Self {
        Self { headers, record }
    }

    /// Trimmed value of column `name`, or `""` when the column is absent.
    pub(crate) fn get(&self, name: &str) -> &'a str {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| self.record.get(idx))
            .map(str::trim)
            .unwrap_or("")
    }

    /// All non-empty fields by header name.
    pub(crate) fn fields(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .zip(self.record.iter())
            .filter(|(h, v)| !h.is_empty() && !v.trim().is_empty())
            .map(|(h, v)| (h.clone(), v.trim().to_string()))
            .collect()
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.record.iter().all(|v| v.trim().is_empty())
    }
}

/// Reads the header row and returns normalized names.
pub(crate) fn read_headers<R: std::io::Read>(
    reader: &mut ::csv::Reader<R>,
    file: &str,
) -> Result<Vec<String>, ImportError> {
    let headers = reader
        .headers()
        .map_err(|e| ImportError::malformed(file, format!("unreadable header row: {e}")))?;
    let names: Vec<String> = headers.iter().map(normalize_header).collect();
    if names.iter().all(String::is_empty) {
        return Err(ImportError::malformed(file, "missing header row"));
    }
    Ok(names)
}

/// Undoes whole-line quoting, where an exporter wrapped every line in one
/// pair of quotes. Detection looks at the first non-blank line; returns
/// `None` when the text is not wrapped.
pub(crate) fn unwrap_quoted_lines(text: &str, delimiter: u8) -> Option<String> {
    let first = text.lines().map(|l| l.trim_start_matches('\u{feff}').trim_end()).find(|l| !l.is_empty())?;
    let style = wrap_style(first, delimiter)?;

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim_start_matches('\u{feff}').trim_end_matches('\r');
        let trimmed = line.trim_end();
        let unwrapped = if is_outer_quoted(trimmed) {
            match style {
                WrapStyle::Backslash => trimmed[1..trimmed.len() - 1].replace("\\\"", "\""),
                WrapStyle::Doubled => single_csv_field(trimmed, delimiter).unwrap_or_else(|| trimmed.to_string()),
            }
        } else {
            line.replace("\\\"", "\"")
        };
        out.push_str(&unwrapped);
        out.push('\n');
    }
    Some(out)
}

#[derive(Clone, Copy)]
enum WrapStyle {
    /// Inner quotes escaped as `\"`.
    Backslash,
    /// Inner quotes doubled, as in regular CSV quoting.
    Doubled,
}

fn is_outer_quoted(line: &str) -> bool {
    line.len() >= 2 && line.starts_with('"') && line.ends_with('"')
}

fn wrap_style(line: &str, delimiter: u8) -> Option<WrapStyle> {
    if !is_outer_quoted(line) {
        return None;
    }
    let inner = &line[1..line.len() - 1];
    if inner.contains("\\\"") {
        return Some(WrapStyle::Backslash);
    }
    let field = single_csv_field(line, delimiter)?;
    field.as_bytes().contains(&delimiter).then_some(WrapStyle::Doubled)
}

/// The value of `line` if it parses as exactly one CSV field.
fn single_csv_field(line: &str, delimiter: u8) -> Option<String> {
    let mut reader = csv_reader(line, delimiter, false);
    let record = reader.records().next()?.ok()?;
    (record.len() == 1).then(|| record.get(0).unwrap_or_default().to_string())
}
