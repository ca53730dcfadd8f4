use std::fmt;
use std::path::PathBuf;

use abschluss_core::StoreError;
use thiserror::Error;

use crate::decode::Encoding;

/// Pipeline stage a fatal import error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detect,
    Decode,
    Parse,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Detect => "detect",
            Stage::Decode => "decode",
            Stage::Parse => "parse",
            Stage::Persist => "persist",
        })
    }
}

/// Fatal, file-level import failures. Row-level problems are [`RowWarning`]s.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{file}: no importer recognizes this file")]
    UnsupportedFormat { file: String },

    #[error("{file}: none of the candidate encodings {tried:?} could decode the file")]
    DecodingExhausted { file: String, tried: Vec<Encoding> },

    #[error("{file}: companion file '{expected}' not found next to the XML descriptor")]
    MissingCompanionFile { file: String, expected: String },

    #[error("{file}: malformed structure: {reason}")]
    MalformedSchema { file: String, reason: String },

    #[error("{file}: could not read {path}: {source}")]
    Io {
        file: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: persisting the batch failed: {source}")]
    Persistence {
        file: String,
        #[source]
        source: StoreError,
    },

    #[error("{file}: import task aborted: {reason}")]
    Aborted { file: String, reason: String },
}

impl ImportError {
    pub fn stage(&self) -> Stage {
        match self {
            ImportError::UnsupportedFormat { .. } => Stage::Detect,
            ImportError::DecodingExhausted { .. } => Stage::Decode,
            ImportError::MissingCompanionFile { .. }
            | ImportError::MalformedSchema { .. }
            | ImportError::Io { .. }
            | ImportError::Aborted { .. } => Stage::Parse,
            ImportError::Persistence { .. } => Stage::Persist,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            ImportError::UnsupportedFormat { file }
            | ImportError::DecodingExhausted { file, .. }
            | ImportError::MissingCompanionFile { file, .. }
            | ImportError::MalformedSchema { file, .. }
            | ImportError::Io { file, .. }
            | ImportError::Persistence { file, .. }
            | ImportError::Aborted { file, .. } => file,
        }
    }

    pub(crate) fn malformed(file: &str, reason: impl Into<String>) -> Self {
        ImportError::MalformedSchema { file: file.to_string(), reason: reason.into() }
    }
}

/// A single row that was skipped or only partially understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWarning {
    /// 1-based data row number within the file.
    pub row: usize,
    pub message: String,
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_variant() {
        let err = ImportError::UnsupportedFormat { file: "a.txt".into() };
        assert_eq!(err.stage(), Stage::Detect);
        assert_eq!(err.stage().to_string(), "detect");

        let err = ImportError::DecodingExhausted { file: "a.csv".into(), tried: vec![Encoding::Utf8] };
        assert_eq!(err.stage(), Stage::Decode);

        let err = ImportError::Persistence {
            file: "a.csv".into(),
            source: StoreError::Rejected("disk full".into()),
        };
        assert_eq!(err.stage(), Stage::Persist);
        assert_eq!(err.file(), "a.csv");
    }

    #[test]
    fn messages_name_the_file() {
        let err = ImportError::MissingCompanionFile { file: "konto.xml".into(), expected: "export.csv".into() };
        let msg = err.to_string();
        assert!(msg.contains("konto.xml"));
        assert!(msg.contains("export.csv"));
    }
}
