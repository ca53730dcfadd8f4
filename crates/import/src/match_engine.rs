//! Scores unprocessed transactions against an extracted document.
//!
//! The engine is a pure function of (query, pool): it never mutates the pool
//! and keeps no state between calls.

use abschluss_core::{days_between, DateRange, Money, SourceType, Transaction};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::MatchingSettings;
use crate::util::{re, sequence_ratio};

pub const AMOUNT_WEIGHT: f64 = 0.40;
pub const DATE_WEIGHT: f64 = 0.20;
/// Credited in place of the date criterion when the query has no date.
pub const UNDATED_CREDIT: f64 = 0.10;
pub const VENDOR_WEIGHT: f64 = 0.25;
pub const REFERENCE_WEIGHT: f64 = 0.15;

/// Overall score from which a candidate counts as matched rather than suggested.
pub const MATCHED_THRESHOLD: f64 = 0.8;

const LEGAL_SUFFIXES: &[&str] = &["gmbh", "ag", "kg", "ohg", "ug", "e.k.", "e.v.", "inc", "ltd", "llc", "corp"];

re!(non_word, r"[^\w\s]");
re!(reference_prefix, r"^(invoice|inv|rechnung|ref|re|nr|no|#)[\s\-\.:#]*");
re!(digit_run, r"\d+");

/// What the caller is looking for, usually taken from an extracted invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchQuery {
    pub amount: Decimal,
    pub date: Option<NaiveDate>,
    pub vendor: Option<String>,
    pub reference: Option<String>,
}

impl MatchQuery {
    pub fn new(amount: Decimal) -> Self {
        Self { amount, date: None, vendor: None, reference: None }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Confidence::VeryHigh
        } else if score >= 0.8 {
            Confidence::High
        } else if score >= 0.7 {
            Confidence::Medium
        } else if score >= 0.5 {
            Confidence::Low
        } else {
            Confidence::VeryLow
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::VeryHigh => "very_high",
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::VeryLow => "very_low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Suggested,
}

impl MatchStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= MATCHED_THRESHOLD {
            MatchStatus::Matched
        } else {
            MatchStatus::Suggested
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmountEvidence {
    pub score: f64,
    pub transaction_amount: Money,
    pub query_amount: Decimal,
    /// `|transaction| - |query|`.
    pub difference: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateEvidence {
    pub score: f64,
    pub transaction_date: NaiveDate,
    pub query_date: NaiveDate,
    pub days_difference: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorField {
    Counterparty,
    Description,
    PaypalPartner,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorEvidence {
    pub score: f64,
    pub transaction_vendor: String,
    pub query_vendor: String,
    pub matched_in: VendorField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceEvidence {
    pub score: f64,
    pub reference: String,
    pub found_in_description: bool,
}

/// Per-criterion sub-scores. `None` means the query did not supply that criterion
/// (or, for the date, the transaction has no booking date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub amount: AmountEvidence,
    pub date: Option<DateEvidence>,
    pub vendor: Option<VendorEvidence>,
    pub reference: Option<ReferenceEvidence>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate<'a> {
    pub transaction: &'a Transaction,
    pub score: f64,
    pub confidence: Confidence,
    pub status: MatchStatus,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct MatchingEngine {
    settings: MatchingSettings,
}

impl MatchingEngine {
    pub fn new(settings: MatchingSettings) -> Self {
        Self { settings }
    }

    /// Ranked candidates from `pool`, best first. Equal scores keep pool order.
    pub fn find_matches<'a>(&self, query: &MatchQuery, pool: &'a [Transaction]) -> Vec<MatchCandidate<'a>> {
        let mut candidates: Vec<MatchCandidate<'a>> = pool
            .iter()
            .filter(|tx| self.in_pool(tx, query))
            .filter_map(|tx| {
                let (score, breakdown) = self.score(tx, query);
                (score >= self.settings.min_score).then(|| MatchCandidate {
                    transaction: tx,
                    score,
                    confidence: Confidence::from_score(score),
                    status: MatchStatus::from_score(score),
                    breakdown,
                })
            })
            .collect();

        // `sort_by` is stable.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(limit) = self.settings.limit {
            candidates.truncate(limit);
        }
        candidates
    }

    /// Unprocessed, amount within tolerance of either sign of the query, and
    /// inside the date window when the query is dated.
    pub fn in_pool(&self, tx: &Transaction, query: &MatchQuery) -> bool {
        if tx.processed {
            return false;
        }
        let amount = tx.amount.as_decimal();
        let tolerance = self.settings.amount_tolerance;
        if (amount - query.amount).abs() > tolerance && (amount + query.amount).abs() > tolerance {
            return false;
        }
        match query.date {
            Some(date) => tx
                .booking_date
                .is_some_and(|booked| DateRange::around(date, self.settings.date_window_days).contains(booked)),
            None => true,
        }
    }

    /// Weighted sum of the sub-scores. Weights are not renormalized when a
    /// criterion is missing.
    pub fn score(&self, tx: &Transaction, query: &MatchQuery) -> (f64, ScoreBreakdown) {
        let amount_score = amount_score(tx.amount.as_decimal(), query.amount);
        let amount = AmountEvidence {
            score: amount_score,
            transaction_amount: tx.amount,
            query_amount: query.amount,
            difference: tx.amount.as_decimal().abs() - query.amount.abs(),
        };
        let mut total = amount_score * AMOUNT_WEIGHT;

        let date = match (query.date, tx.booking_date) {
            (Some(query_date), Some(transaction_date)) => {
                let days = days_between(transaction_date, query_date);
                let score = date_score(days);
                total += score * DATE_WEIGHT;
                Some(DateEvidence { score, transaction_date, query_date, days_difference: days })
            }
            _ => {
                total += UNDATED_CREDIT;
                None
            }
        };

        let vendor = query.vendor.as_deref().filter(|v| !v.trim().is_empty()).map(|v| vendor_evidence(tx, v));
        if let Some(v) = &vendor {
            total += v.score * VENDOR_WEIGHT;
        }

        let reference = query.reference.as_deref().filter(|r| !r.trim().is_empty()).map(|r| {
            let score = reference_score(&tx.description, r);
            ReferenceEvidence { score, reference: r.to_string(), found_in_description: score > 0.0 }
        });
        if let Some(r) = &reference {
            total += r.score * REFERENCE_WEIGHT;
        }

        (total, ScoreBreakdown { amount, date, vendor, reference })
    }
}

/// Compares absolute values; sign orientation is irrelevant.
pub fn amount_score(transaction: Decimal, query: Decimal) -> f64 {
    let tx = transaction.abs();
    let doc = query.abs();
    if doc.is_zero() {
        return 0.0;
    }
    if tx == doc {
        return 1.0;
    }
    let pct = (tx - doc).abs() / doc;
    if pct < Decimal::new(1, 3) {
        0.99
    } else if pct < Decimal::new(1, 2) {
        0.95
    } else if pct < Decimal::new(2, 2) {
        0.85
    } else if pct < Decimal::new(5, 2) {
        0.70
    } else if pct < Decimal::new(1, 1) {
        0.50
    } else {
        // Capped at the last step so the score never rises with the difference.
        let pct = pct.to_f64().unwrap_or(f64::MAX);
        (1.0 - pct).clamp(0.0, 0.50)
    }
}

pub fn date_score(days: u64) -> f64 {
    match days {
        0 => 1.0,
        1 => 0.95,
        2..=3 => 0.90,
        4..=7 => 0.80,
        8..=14 => 0.60,
        15..=30 => 0.40,
        _ => (1.0 - days as f64 / 365.0).clamp(0.0, 0.40),
    }
}

fn vendor_evidence(tx: &Transaction, vendor: &str) -> VendorEvidence {
    let by_counterparty = text_similarity(&tx.counterparty_name, vendor);
    let by_description = text_similarity(&tx.description, vendor);
    let mut evidence = if by_counterparty > by_description {
        VendorEvidence {
            score: by_counterparty,
            transaction_vendor: tx.counterparty_name.clone(),
            query_vendor: vendor.to_string(),
            matched_in: VendorField::Counterparty,
        }
    } else {
        VendorEvidence {
            score: by_description,
            transaction_vendor: tx.description.clone(),
            query_vendor: vendor.to_string(),
            matched_in: VendorField::Description,
        }
    };

    if tx.source_type == SourceType::Paypal {
        if let Some(partner) = tx.raw("partner_name").filter(|p| !p.is_empty()) {
            let score = text_similarity(partner, vendor);
            if score > evidence.score {
                evidence = VendorEvidence {
                    score,
                    transaction_vendor: partner.to_string(),
                    query_vendor: vendor.to_string(),
                    matched_in: VendorField::PaypalPartner,
                };
            }
        }
    }
    evidence
}

/// 1.0 for equal normalized names, 0.9 if one contains the other, else the
/// sequence ratio. Blank input on either side scores 0.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_vendor(a);
    let b = normalize_vendor(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.9;
    }
    sequence_ratio(&a, &b)
}

/// Lowercase, legal-form words dropped, punctuation turned into spaces,
/// whitespace collapsed.
pub fn normalize_vendor(name: &str) -> String {
    let lower = name.to_lowercase();
    let kept: Vec<&str> = lower
        .split_whitespace()
        .filter(|word| {
            let bare = word.trim_end_matches([',', ';', ')', '.']);
            !LEGAL_SUFFIXES.contains(word) && !LEGAL_SUFFIXES.contains(&bare)
        })
        .collect();
    let joined = kept.join(" ");
    let stripped = non_word().replace_all(&joined, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 1.0 verbatim (case-insensitive), 0.95 after dropping an invoice-number
/// prefix, 0.8 if a run of at least four digits reappears, else 0.
pub fn reference_score(text: &str, reference: &str) -> f64 {
    let text_lower = text.to_lowercase();
    let reference_lower = reference.trim().to_lowercase();
    if text_lower.is_empty() || reference_lower.is_empty() {
        return 0.0;
    }
    if text_lower.contains(&reference_lower) {
        return 1.0;
    }
    let cleaned = reference_prefix().replace(&reference_lower, "");
    if !cleaned.is_empty() && text_lower.contains(cleaned.as_ref()) {
        return 0.95;
    }
    let digits_found = digit_run()
        .find_iter(reference)
        .map(|m| m.as_str())
        .any(|run| run.len() >= 4 && text.contains(run));
    if digits_found {
        0.8
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn acme_debit() -> Transaction {
        let mut tx = Transaction::new(SourceType::BankCsv, Some(date(2024, 3, 1)), Money::from_cents(-11_900));
        tx.counterparty_name = "ACME GmbH".into();
        tx.description = "Invoice 2024-001 EREF:X1".into();
        tx
    }

    #[test]
    fn bank_row_matches_invoice_with_high_score() {
        let engine = MatchingEngine::default();
        let pool = vec![acme_debit()];
        let query = MatchQuery::new(dec("119.00"))
            .with_date(date(2024, 3, 2))
            .with_vendor("ACME")
            .with_reference("2024-001");
        let found = engine.find_matches(&query, &pool);
        assert_eq!(found.len(), 1);
        let best = &found[0];
        assert!(best.score >= 0.9, "score was {}", best.score);
        assert_eq!(best.status, MatchStatus::Matched);
        assert_eq!(best.confidence, Confidence::VeryHigh);
        assert_eq!(best.breakdown.amount.score, 1.0);
        assert_eq!(best.breakdown.date.as_ref().map(|d| d.days_difference), Some(1));
        assert_eq!(best.breakdown.vendor.as_ref().map(|v| v.matched_in), Some(VendorField::Counterparty));
        assert!(best.breakdown.reference.as_ref().is_some_and(|r| r.found_in_description));
    }

    #[test]
    fn amount_score_never_rises_with_difference() {
        let query = dec("100.00");
        let mut previous = f64::INFINITY;
        for cents in 10_000..=40_000i64 {
            let score = amount_score(Decimal::new(cents, 2), query);
            assert!(score <= previous, "score rose at {cents} cents");
            previous = score;
        }
        assert_eq!(amount_score(dec("-100.00"), query), 1.0);
        assert_eq!(amount_score(dec("100.00"), Decimal::ZERO), 0.0);
    }

    #[test]
    fn date_score_never_rises_with_distance() {
        let mut previous = f64::INFINITY;
        for days in 0..800 {
            let score = date_score(days);
            assert!(score <= previous, "score rose at {days} days");
            previous = score;
        }
        assert_eq!(date_score(0), 1.0);
        assert_eq!(date_score(3), 0.90);
        assert_eq!(date_score(30), 0.40);
    }

    #[test]
    fn overall_score_monotone_in_date_distance() {
        let engine = MatchingEngine::default();
        let query = MatchQuery::new(dec("119.00")).with_date(date(2024, 3, 1)).with_vendor("ACME");
        let mut previous = f64::INFINITY;
        for offset in 0..60 {
            let mut tx = acme_debit();
            tx.booking_date = date(2024, 3, 1).checked_add_days(chrono::Days::new(offset));
            let (score, _) = engine.score(&tx, &query);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn undated_query_gets_flat_credit() {
        let engine = MatchingEngine::default();
        let (score, breakdown) = engine.score(&acme_debit(), &MatchQuery::new(dec("119.00")));
        assert!((score - (AMOUNT_WEIGHT + UNDATED_CREDIT)).abs() < 1e-9);
        assert!(breakdown.date.is_none());
        assert!(breakdown.vendor.is_none());
    }

    #[test]
    fn pool_filter_applies_tolerance_window_and_processed_flag() {
        let engine = MatchingEngine::default();
        let query = MatchQuery::new(dec("119.00")).with_date(date(2024, 3, 2));

        let mut processed = acme_debit();
        processed.processed = true;
        let mut off_by_two_cents = acme_debit();
        off_by_two_cents.amount = Money::from_cents(-11_902);
        let mut credit = acme_debit();
        credit.amount = Money::from_cents(11_901);
        let mut too_old = acme_debit();
        too_old.booking_date = Some(date(2024, 1, 15));
        let mut undated = acme_debit();
        undated.booking_date = None;

        assert!(!engine.in_pool(&processed, &query));
        assert!(!engine.in_pool(&off_by_two_cents, &query));
        assert!(engine.in_pool(&credit, &query));
        assert!(!engine.in_pool(&too_old, &query));
        assert!(!engine.in_pool(&undated, &query));
        assert!(engine.in_pool(&undated, &MatchQuery::new(dec("119.00"))));
    }

    #[test]
    fn ranking_is_stable_for_equal_scores_and_limited() {
        let mut first = acme_debit();
        first.id = Some(1);
        let mut second = acme_debit();
        second.id = Some(2);
        let mut weaker = acme_debit();
        weaker.id = Some(3);
        weaker.booking_date = Some(date(2024, 3, 20));
        let pool = vec![weaker, first, second];

        let query = MatchQuery::new(dec("119.00")).with_date(date(2024, 3, 1));
        let ids: Vec<_> = MatchingEngine::default()
            .find_matches(&query, &pool)
            .iter()
            .map(|c| c.transaction.id)
            .collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);

        let limited = MatchingEngine::new(MatchingSettings { limit: Some(1), ..MatchingSettings::default() });
        assert_eq!(limited.find_matches(&query, &pool).len(), 1);
    }

    #[test]
    fn low_scores_are_discarded() {
        let engine = MatchingEngine::new(MatchingSettings { min_score: 0.95, ..MatchingSettings::default() });
        let query = MatchQuery::new(dec("119.00")).with_date(date(2024, 3, 20));
        assert!(engine.find_matches(&query, &[acme_debit()]).is_empty());
    }

    #[test]
    fn paypal_partner_name_can_win_vendor_score() {
        let mut tx = Transaction::new(SourceType::Paypal, Some(date(2024, 3, 1)), Money::from_cents(-4_999));
        tx.description = "Zahlung | ID: 7XY".into();
        tx.raw_fields.insert("partner_name".into(), "Druckerei Müller".into());
        let engine = MatchingEngine::default();
        let (_, breakdown) = engine.score(&tx, &MatchQuery::new(dec("49.99")).with_vendor("Druckerei Müller GmbH"));
        let vendor = breakdown.vendor.unwrap();
        assert_eq!(vendor.matched_in, VendorField::PaypalPartner);
        assert_eq!(vendor.score, 1.0);
    }

    #[test]
    fn vendor_normalization() {
        assert_eq!(normalize_vendor("ACME GmbH & Co. KG"), "acme co");
        assert_eq!(normalize_vendor("Hagen Trading Ltd."), "hagen trading");
        assert_eq!(normalize_vendor("Hagener Kaufhaus e.K."), "hagener kaufhaus");
        assert_eq!(text_similarity("ACME Inc", "acme"), 1.0);
        assert_eq!(text_similarity("ACME Handel", "acme"), 0.9);
        assert_eq!(text_similarity("", "acme"), 0.0);
    }

    #[test]
    fn reference_tiers() {
        assert_eq!(reference_score("Rechnung RE-2024-001", "re-2024-001"), 1.0);
        assert_eq!(reference_score("Zahlung 2024-001", "INV-2024-001"), 0.95);
        assert_eq!(reference_score("Zahlung 2024/001", "Nr. 2024-001"), 0.8);
        assert_eq!(reference_score("Zahlung 12-01", "Nr. 12-01-5"), 0.0);
        assert_eq!(reference_score("", "2024"), 0.0);
    }

    #[test]
    fn confidence_labels() {
        assert_eq!(Confidence::from_score(0.95), Confidence::VeryHigh);
        assert_eq!(Confidence::from_score(0.8), Confidence::High);
        assert_eq!(Confidence::from_score(0.75), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.5), Confidence::Low);
        assert_eq!(Confidence::from_score(0.31), Confidence::VeryLow);
        assert_eq!(MatchStatus::from_score(0.79), MatchStatus::Suggested);
    }
}
