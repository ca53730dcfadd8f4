//! Locale-aware number and date parsing shared by every row parser.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocaleError {
    #[error("Invalid amount: '{0}'")]
    InvalidAmount(String),
    #[error("Unrecognized date: '{0}'")]
    InvalidDate(String),
}

/// German bank and bookkeeping exports: day first.
pub const GERMAN_DATES: &[&str] = &["%d.%m.%Y", "%d.%m.%y", "%Y-%m-%d", "%d-%m-%Y"];

pub const PAYPAL_DATES: &[&str] = &[
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
];

/// Provider exports: ISO first.
pub const ISO_DATES: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d",
];

pub const MOLLIE_DATES: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%m/%d/%Y",
];

const CURRENCY_MARKERS: &[&str] = &["â‚¬", "EUR", "USD", "GBP", "CHF", "€", "$", "£"];

/// Parses a locale-formatted decimal.
///
/// A lone comma is the decimal point; with both separators present the
/// rightmost one is. Currency markers, `(x)` and trailing-minus negatives are
/// accepted. Blank input is zero.
pub fn parse_decimal(s: &str) -> Result<Decimal, LocaleError> {
    signed_decimal(s, normalize_separators)
}

/// German bookkeeping notation: every dot groups thousands and a comma is
/// the decimal point, so `-1.500` is minus fifteen hundred.
pub fn parse_german_decimal(s: &str) -> Result<Decimal, LocaleError> {
    signed_decimal(s, |body| body.replace('.', "").replace(',', "."))
}

fn signed_decimal(s: &str, normalize: impl Fn(&str) -> String) -> Result<Decimal, LocaleError> {
    let (negative, body) = clean_number(s);
    if body.is_empty() {
        return if negative { Err(LocaleError::InvalidAmount(s.trim().to_string())) } else { Ok(Decimal::ZERO) };
    }
    let value =
        Decimal::from_str(&normalize(&body)).map_err(|_| LocaleError::InvalidAmount(s.trim().to_string()))?;
    Ok(if negative { -value } else { value })
}

/// Amount that may be either integer minor units or an already-decimal value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderAmount {
    pub value: Decimal,
    /// True when the integer was read as cents and divided by 100.
    pub from_cents: bool,
}

/// Integers greater than 999 are read as cents, everything else as a decimal
/// amount. `1000.00` EUR and a cents-encoded `1000` are indistinguishable here.
pub fn parse_cents_or_decimal(s: &str) -> Result<ProviderAmount, LocaleError> {
    let (negative, body) = clean_number(s);
    if body.is_empty() {
        return Ok(ProviderAmount { value: Decimal::ZERO, from_cents: false });
    }
    let normalized = normalize_separators(&body);
    let invalid = || LocaleError::InvalidAmount(s.trim().to_string());

    if normalized.contains('.') {
        let value = Decimal::from_str(&normalized).map_err(|_| invalid())?;
        return Ok(ProviderAmount { value: if negative { -value } else { value }, from_cents: false });
    }

    let magnitude = i64::from_str(&normalized).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    if value > 999 {
        Ok(ProviderAmount { value: Decimal::new(value, 2), from_cents: true })
    } else {
        Ok(ProviderAmount { value: Decimal::from(value), from_cents: false })
    }
}

/// Strips whitespace, currency markers and sign notation. Returns the sign
/// separately from the remaining digits and separators.
fn clean_number(s: &str) -> (bool, String) {
    let mut body: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    for marker in CURRENCY_MARKERS {
        if body.contains(marker) {
            body = body.replace(marker, "");
        }
    }

    let mut negative = false;
    if body.starts_with('(') && body.ends_with(')') && body.len() >= 2 {
        negative = true;
        body = body[1..body.len() - 1].to_string();
    }
    if let Some(rest) = body.strip_suffix('-') {
        negative = true;
        body = rest.to_string();
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        body = rest.to_string();
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest.to_string();
    }
    (negative, body)
}

fn normalize_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) if s.matches(',').count() == 1 => s.replace(',', "."),
        (Some(_), None) => s.replace(',', ""),
        (None, Some(_)) if s.matches('.').count() > 1 => s.replace('.', ""),
        _ => s.to_string(),
    }
}

/// Tries each pattern in order. Blank input is `Ok(None)`; a non-blank value
/// no pattern accepts is an error.
pub fn parse_date(s: &str, formats: &[&str]) -> Result<Option<NaiveDate>, LocaleError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }

    for fmt in formats {
        let parsed = if fmt.contains("%H") {
            NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date())
        } else {
            NaiveDate::parse_from_str(s, fmt).ok()
        };
        // chrono's %Y also accepts "24"; leave two-digit years to %y.
        if let Some(date) = parsed.filter(|d| !fmt.contains("%Y") || d.year() >= 1000) {
            return Ok(Some(date));
        }
    }

    Err(LocaleError::InvalidDate(s.to_string()))
}
