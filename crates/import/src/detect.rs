//! Filename predicates and header sniffing that pick a row parser.

use abschluss_core::SourceType;
use std::fmt;
use std::path::Path;

use crate::decode::Encoding;
use crate::util::re;

re!(bank_export_name, r"\d{6,}_\d{6}_\d{6}\.csv$");

/// Every importable source family. Selection is a scan of [`Format::PRECEDENCE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    BankXml,
    BankCsv,
    Paypal,
    Stripe,
    Mollie,
    Document,
    Datev,
}

impl Format {
    /// Bank XML is matched by extension first; DATEV catches every remaining CSV.
    pub const PRECEDENCE: [Format; 7] = [
        Format::BankXml,
        Format::BankCsv,
        Format::Paypal,
        Format::Stripe,
        Format::Mollie,
        Format::Document,
        Format::Datev,
    ];

    /// First format in precedence order whose predicate accepts `path`.
    pub fn detect(path: &Path) -> Option<Format> {
        let name = file_name(path);
        Self::PRECEDENCE.into_iter().find(|f| f.can_handle(&name))
    }

    /// Predicate on a bare file name (no directory).
    pub fn can_handle(self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        let ext = extension(&name);
        let csv = ext == Some("csv");
        match self {
            Format::BankXml => ext == Some("xml"),
            Format::BankCsv => csv && (name.contains("konto") || bank_export_name().is_match(&name)),
            Format::Paypal => csv && (name.contains("paypal") || name == "download.csv"),
            Format::Stripe => {
                csv && (["stripe", "unified_payments", "unified-payments"].iter().any(|k| name.contains(k))
                    || (name.contains("payments") && !name.contains("mollie")))
            }
            Format::Mollie => csv && name.contains("mollie"),
            Format::Document => matches!(ext, Some("pdf" | "jpg" | "jpeg" | "png")),
            Format::Datev => csv,
        }
    }

    pub fn source_type(self) -> SourceType {
        match self {
            Format::BankXml => SourceType::BankXml,
            Format::BankCsv => SourceType::BankCsv,
            Format::Paypal => SourceType::Paypal,
            Format::Stripe => SourceType::Stripe,
            Format::Mollie => SourceType::Mollie,
            Format::Document => SourceType::Pdf,
            Format::Datev => SourceType::Datev,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::BankXml => "bank_xml",
            Format::BankCsv => "bank_csv",
            Format::Paypal => "paypal",
            Format::Stripe => "stripe",
            Format::Mollie => "mollie",
            Format::Document => "document",
            Format::Datev => "datev",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The two DATEV CSV dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatevLayout {
    /// `EXTF` booking batch: two metadata rows, then fixed positions.
    Classic,
    /// Header-driven document list with German column names.
    DocumentExport,
}

impl DatevLayout {
    pub fn name(self) -> &'static str {
        match self {
            DatevLayout::Classic => "classic",
            DatevLayout::DocumentExport => "document_export",
        }
    }
}

/// Looks at the first line only. A header naming both `Belegart` and
/// `Geschäftspartner` is a document export; anything else is read as classic.
pub fn sniff_datev_layout(bytes: &[u8]) -> DatevLayout {
    let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or_default();
    let header = [Encoding::Utf8Sig, Encoding::Windows1252, Encoding::Latin1]
        .into_iter()
        .find_map(|enc| enc.decode(first_line))
        .unwrap_or_default();

    if header.contains("Belegart") && header.contains("Geschäftspartner") {
        DatevLayout::DocumentExport
    } else {
        DatevLayout::Classic
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(lower_name: &str) -> Option<&str> {
    lower_name.rsplit_once('.').map(|(_, ext)| ext)
}
