use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::decode::Encoding;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Runtime configuration. Every field has a default, so an empty TOML
/// document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub encodings: EncodingSettings,
    pub import: ImportSettings,
    pub datev: DatevSettings,
    pub matching: MatchingSettings,
}

/// Candidate encodings per source family, tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingSettings {
    pub bank: Vec<Encoding>,
    pub provider: Vec<Encoding>,
    pub datev: Vec<Encoding>,
    pub datev_export: Vec<Encoding>,
    pub xml: Vec<Encoding>,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        use Encoding::*;
        Self {
            bank: vec![Windows1252, Latin1, Utf8, Utf8Sig],
            provider: vec![Utf8, Utf8Sig, Windows1252, Latin1],
            datev: vec![Windows1252],
            datev_export: vec![Utf8Sig, Utf8, Windows1252],
            xml: vec![Utf8Sig, Utf8, Windows1252],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Rows handed to the store per write.
    pub flush_every: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self { flush_every: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatevSettings {
    /// `Belegart` codes of the document export whose amounts are always booked negative.
    pub income_document_codes: Vec<String>,
    /// Year for classic `DDMM` dates when the header has no fiscal-year start.
    pub fallback_year: Option<i32>,
}

impl Default for DatevSettings {
    fn default() -> Self {
        Self {
            income_document_codes: vec!["G".to_string(), "E".to_string()],
            fallback_year: None,
        }
    }
}

impl DatevSettings {
    pub fn is_income_code(&self, code: &str) -> bool {
        let code = code.trim();
        self.income_document_codes.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub amount_tolerance: Decimal,
    pub date_window_days: u32,
    pub min_score: f64,
    /// `None` returns every candidate above `min_score`.
    pub limit: Option<usize>,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            amount_tolerance: Decimal::new(1, 2),
            date_window_days: 30,
            min_score: 0.3,
            limit: Some(10),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.import.flush_every == 0 {
            return Err(ConfigError::Invalid("import.flush_every must be at least 1".into()));
        }
        let families = [
            ("bank", &self.encodings.bank),
            ("provider", &self.encodings.provider),
            ("datev", &self.encodings.datev),
            ("datev_export", &self.encodings.datev_export),
            ("xml", &self.encodings.xml),
        ];
        if let Some((name, _)) = families.iter().find(|(_, list)| list.is_empty()) {
            return Err(ConfigError::Invalid(format!("encodings.{name} must not be empty")));
        }
        if !(0.0..=1.0).contains(&self.matching.min_score) {
            return Err(ConfigError::Invalid("matching.min_score must be within 0..=1".into()));
        }
        Ok(())
    }
}
