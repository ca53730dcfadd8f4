//! GDPdU-style bank export: an XML descriptor naming a headerless companion CSV.

use abschluss_core::{SourceType, Transaction};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{csv_reader, decode_named, money, unwrap_quoted_lines, ParseOutput, SourceFile};
use crate::config::Settings;
use crate::error::ImportError;
use crate::locale::{self, GERMAN_DATES};

const DATASET_END: &str = "</DataSet>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Numeric,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSupplier {
    pub name: String,
    pub location: String,
    pub comment: String,
}

/// What the XML descriptor declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub supplier: DataSupplier,
    pub url: String,
    pub columns: Vec<Column>,
}

impl Descriptor {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn first_of_kind(&self, kind: ColumnKind) -> Option<usize> {
        self.columns.iter().position(|c| c.kind == kind)
    }

    /// `Betrag`, else the first numeric column.
    pub fn amount_column(&self) -> Option<usize> {
        self.index_of("Betrag").or_else(|| self.first_of_kind(ColumnKind::Numeric))
    }
}

pub fn parse(source: &SourceFile, settings: &Settings) -> Result<ParseOutput, ImportError> {
    let file = source.file_name.as_str();
    let (xml, _) = source.decode(&settings.encodings.xml)?;
    let descriptor = read_descriptor(&sanitize(&xml), file)?;
    let amount_col = descriptor
        .amount_column()
        .ok_or_else(|| ImportError::malformed(file, "schema declares no amount column"))?;

    let dir = descriptor_dir(&source.path);
    let companion = resolve_companion(dir, &descriptor.url).ok_or_else(|| ImportError::MissingCompanionFile {
        file: file.to_string(),
        expected: descriptor.url.clone(),
    })?;
    let companion_name = crate::detect::file_name(&companion);
    info!(file, companion = %companion_name, columns = descriptor.columns.len(), "bank XML descriptor read");

    let bytes = std::fs::read(&companion).map_err(|source| ImportError::Io {
        file: file.to_string(),
        path: companion.clone(),
        source,
    })?;
    let (text, encoding) = decode_named(&companion_name, &bytes, &settings.encodings.xml)?;
    let text = unwrap_quoted_lines(&text, b';').unwrap_or(text);

    let mut out = ParseOutput::with_encoding(encoding);
    out.meta("name", descriptor.supplier.name.as_str());
    out.meta("location", descriptor.supplier.location.as_str());
    out.meta("comment", descriptor.supplier.comment.as_str());
    out.meta("companion_file", companion_name);
    parse_rows(&text, &descriptor, amount_col, &mut out);
    Ok(out)
}

/// Keeps everything up to the first `</DataSet>` and drops control characters
/// other than tab, CR and LF.
fn sanitize(xml: &str) -> String {
    let body = match xml.find(DATASET_END) {
        Some(idx) => &xml[..idx + DATASET_END.len()],
        None => xml,
    };
    body.chars()
        .filter(|&c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'))
        .collect()
}

/// Reads supplier, table URL and the ordered column schema.
pub fn read_descriptor(xml: &str, file: &str) -> Result<Descriptor, ImportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut supplier: Option<DataSupplier> = None;
    let mut url: Option<String> = None;
    let mut columns = Vec::new();
    let mut current: Option<Column> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ImportError::malformed(file, format!("XML error at {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                open_element(&name, &mut supplier, &mut current);
                path.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                open_element(&name, &mut supplier, &mut current);
            }
            Event::End(_) => {
                if let Some(name) = path.pop() {
                    if is_column(&name) {
                        if let Some(col) = current.take() {
                            columns.push(col);
                        }
                    }
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| ImportError::malformed(file, format!("bad XML text: {e}")))?
                    .trim()
                    .to_string();
                assign_text(&path, text, &mut supplier, &mut url, &mut current);
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t).trim().to_string();
                assign_text(&path, text, &mut supplier, &mut url, &mut current);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let supplier = supplier.ok_or_else(|| ImportError::malformed(file, "missing DataSupplier"))?;
    let url = url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ImportError::malformed(file, "missing Table/URL"))?;
    if columns.is_empty() {
        return Err(ImportError::malformed(file, "no column definitions"));
    }
    if columns.iter().any(|c| c.name.is_empty()) {
        return Err(ImportError::malformed(file, "column without a Name"));
    }
    Ok(Descriptor { supplier, url, columns })
}

fn is_column(name: &str) -> bool {
    matches!(name, "VariableColumn" | "VariablePrimaryKey")
}

fn open_element(name: &str, supplier: &mut Option<DataSupplier>, current: &mut Option<Column>) {
    match name {
        "DataSupplier" => {
            supplier.get_or_insert_with(DataSupplier::default);
        }
        n if is_column(n) => *current = Some(Column { name: String::new(), kind: ColumnKind::Text }),
        "Numeric" => {
            if let Some(col) = current.as_mut() {
                col.kind = ColumnKind::Numeric;
            }
        }
        "Date" => {
            if let Some(col) = current.as_mut().filter(|c| c.kind == ColumnKind::Text) {
                col.kind = ColumnKind::Date;
            }
        }
        _ => {}
    }
}

fn assign_text(
    path: &[String],
    text: String,
    supplier: &mut Option<DataSupplier>,
    url: &mut Option<String>,
    current: &mut Option<Column>,
) {
    let (Some(leaf), Some(parent)) = (path.last(), path.len().checked_sub(2).and_then(|i| path.get(i))) else {
        return;
    };
    match (parent.as_str(), leaf.as_str()) {
        ("DataSupplier", field) => {
            if let Some(s) = supplier.as_mut() {
                let unquoted = text.trim_matches('"').to_string();
                match field {
                    "Name" => s.name = text,
                    "Location" => s.location = unquoted,
                    "Comment" => s.comment = unquoted,
                    _ => {}
                }
            }
        }
        ("Table", "URL") if url.is_none() => *url = Some(text),
        (p, "Name") if is_column(p) => {
            if let Some(col) = current.as_mut() {
                col.name = text;
            }
        }
        _ => {}
    }
}

/// Exact path first, then a case-insensitive name match in the same directory.
/// Directory holding the descriptor. A bare file name has an empty parent,
/// which `read_dir` rejects, so it maps to the working directory.
fn descriptor_dir(path: &Path) -> &Path {
    path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."))
}

pub fn resolve_companion(dir: &Path, url: &str) -> Option<PathBuf> {
    let exact = dir.join(url);
    if exact.is_file() {
        return Some(exact);
    }
    let wanted = Path::new(url).file_name()?.to_string_lossy().to_lowercase();
    let entries = std::fs::read_dir(dir).ok()?;
    let found = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|p| p.is_file() && p.file_name().is_some_and(|n| n.to_string_lossy().to_lowercase() == wanted));
    if let Some(p) = &found {
        debug!(url, resolved = %p.display(), "companion resolved case-insensitively");
    }
    found
}

fn parse_rows(text: &str, descriptor: &Descriptor, amount_col: usize, out: &mut ParseOutput) {
    let date_col = descriptor.index_of("Buchungstag").or_else(|| descriptor.first_of_kind(ColumnKind::Date));
    let name_col = descriptor.index_of("Name");
    let purpose_col = descriptor.index_of("Verwendungszweck");
    let id_col = descriptor.index_of("Buchungs-ID");

    let mut reader = csv_reader(text, b';', false);
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.warn(row, format!("unreadable row: {e}"));
                continue;
            }
        };
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        if record.len() <= amount_col {
            out.warn(row, format!("expected {} columns, found {}", descriptor.columns.len(), record.len()));
            continue;
        }
        let field = |col: Option<usize>| col.and_then(|i| record.get(i)).map(str::trim).unwrap_or("");

        let amount = out.german_amount(row, &descriptor.columns[amount_col].name, field(Some(amount_col)));
        let booking_date = out.date(row, "booking date", field(date_col), GERMAN_DATES);

        let mut tx = Transaction::new(SourceType::BankXml, booking_date, money(amount));
        tx.counterparty_name = field(name_col).to_string();
        tx.description = field(purpose_col).to_string();
        for (col, value) in descriptor.columns.iter().zip(record.iter()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let stored = match col.kind {
                ColumnKind::Date => locale::parse_date(value, GERMAN_DATES).ok().flatten().map(|d| d.to_string()),
                _ => None,
            };
            tx.raw_fields.insert(col.name.clone(), stored.unwrap_or_else(|| value.to_string()));
        }
        let id = field(id_col);
        if !id.is_empty() {
            tx.raw_fields.insert("reference".into(), id.to_string());
        }
        out.push(tx);
    }
}
