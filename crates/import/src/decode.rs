use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Byte values Windows-1252 leaves unassigned; a strict decoder rejects them.
const CP1252_UNASSIGNED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// UTF-8 with an optional leading byte-order mark, which is dropped.
    #[serde(rename = "utf-8-sig")]
    Utf8Sig,
    #[serde(rename = "cp1252", alias = "windows-1252")]
    Windows1252,
    #[serde(rename = "iso-8859-1", alias = "latin-1")]
    Latin1,
}

impl Encoding {
    pub fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf8Sig => "utf-8-sig",
            Encoding::Windows1252 => "cp1252",
            Encoding::Latin1 => "iso-8859-1",
        }
    }

    /// Strict decode of the whole buffer; `None` if any byte sequence is invalid.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Encoding::Utf8Sig => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                std::str::from_utf8(body).ok().map(str::to_owned)
            }
            Encoding::Windows1252 => {
                if bytes.iter().any(|b| CP1252_UNASSIGNED.contains(b)) {
                    return None;
                }
                let (text, had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
                (!had_errors).then(|| text.into_owned())
            }
            Encoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("No candidate encoding could decode the input (tried {tried:?})")]
    Exhausted { tried: Vec<Encoding> },
}

/// Tries `candidates` in order and returns the text from the first encoding
/// that decodes the full byte stream.
pub fn decode(bytes: &[u8], candidates: &[Encoding]) -> Result<(String, Encoding), DecodeError> {
    candidates
        .iter()
        .find_map(|&enc| enc.decode(bytes).map(|text| (text, enc)))
        .ok_or_else(|| DecodeError::Exhausted { tried: candidates.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_first_wins_for_valid_utf8() {
        let (text, enc) = decode("Gebühr".as_bytes(), &[Encoding::Utf8, Encoding::Windows1252]).unwrap();
        assert_eq!(text, "Gebühr");
        assert_eq!(enc, Encoding::Utf8);
    }

    #[test]
    fn cp1252_decodes_umlauts() {
        let bytes = b"M\xfcller GmbH \x80";
        let (text, enc) = decode(bytes, &[Encoding::Windows1252]).unwrap();
        assert_eq!(text, "Müller GmbH €");
        assert_eq!(enc, Encoding::Windows1252);
    }

    #[test]
    fn invalid_utf8_falls_through_to_next_candidate() {
        let bytes = b"M\xfcller";
        let (text, enc) = decode(bytes, &[Encoding::Utf8, Encoding::Utf8Sig, Encoding::Windows1252]).unwrap();
        assert_eq!(text, "Müller");
        assert_eq!(enc, Encoding::Windows1252);
    }

    #[test]
    fn unassigned_cp1252_byte_falls_back_to_latin1() {
        let bytes = b"A\x81B";
        let (text, enc) = decode(bytes, &[Encoding::Windows1252, Encoding::Latin1]).unwrap();
        assert_eq!(enc, Encoding::Latin1);
        assert_eq!(text.chars().count(), 3);
    }

    #[test]
    fn utf8_sig_strips_bom() {
        let bytes = b"\xEF\xBB\xBFBelegart";
        let (text, _) = decode(bytes, &[Encoding::Utf8Sig]).unwrap();
        assert_eq!(text, "Belegart");
    }

    #[test]
    fn exhausted_when_nothing_fits() {
        let err = decode(b"\xff\xfe\xfd", &[Encoding::Utf8, Encoding::Utf8Sig]).unwrap_err();
        assert_eq!(err, DecodeError::Exhausted { tried: vec![Encoding::Utf8, Encoding::Utf8Sig] });
    }
}
