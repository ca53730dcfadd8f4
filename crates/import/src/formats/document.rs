//! PDF/image passthrough: the file becomes a pending Document, no rows.

use abschluss_core::{Document, DocumentStatus};
use sha2::{Digest, Sha256};

use super::{ParseOutput, SourceFile};
use crate::error::ImportError;

pub fn parse(source: &SourceFile) -> Result<ParseOutput, ImportError> {
    let document = Document {
        id: None,
        batch_id: None,
        filename: source.file_name.clone(),
        mime_type: mime_type(&source.file_name).to_string(),
        content_hash: sha256_hex(&source.bytes),
        size_bytes: source.bytes.len() as u64,
        status: DocumentStatus::PendingProcessing,
        linked_booking_id: None,
        file_data: source.bytes.clone(),
    };

    let mut out = ParseOutput::default();
    out.meta("filename", &source.file_name);
    out.meta("mime_type", &document.mime_type);
    out.meta("content_hash", &document.content_hash);
    out.meta("size_bytes", document.size_bytes.to_string());
    out.documents.push(document);
    Ok(out)
}

fn mime_type(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => "application/pdf",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hash: [u8; 32] = hasher.finalize().into();
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_hash_is_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn pdf_becomes_pending_document() {
        let source = SourceFile::new("/inbox/Rechnung_0815.PDF", b"%PDF-1.7 fake".to_vec());
        let out = parse(&source).unwrap();
        assert!(out.transactions.is_empty());
        let doc = &out.documents[0];
        assert_eq!(doc.filename, "Rechnung_0815.PDF");
        assert_eq!(doc.mime_type, "application/pdf");
        assert_eq!(doc.size_bytes, 13);
        assert_eq!(doc.status, DocumentStatus::PendingProcessing);
        assert_eq!(doc.content_hash.len(), 64);
        assert!(doc.is_pending());
        assert_eq!(out.metadata.get("mime_type").map(String::as_str), Some("application/pdf"));
    }

    #[test]
    fn image_mime_types() {
        assert_eq!(mime_type("scan.jpeg"), "image/jpeg");
        assert_eq!(mime_type("scan.JPG"), "image/jpeg");
        assert_eq!(mime_type("scan.png"), "image/png");
    }
}
