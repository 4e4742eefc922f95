//! Pure row normalization: one raw spreadsheet row (or one feed record)
//! mapped into typed attributes. Parse failures are soft: the value comes
//! back as `None` and the validation gate downstream decides what to do.

use chrono::NaiveDate;
use core_types::types::{BenchmarkIndex, NormalizedSecurity, SecurityType, SyncSource, DEFAULT_SERIES};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use workbook_source::SheetRow;

// Positional column contract for the uploaded exports. The mapping is fixed
// by position, not by header text.
const COL_REFERENCE_DATE: usize = 0; // A
const COL_CODE: usize = 1; // B
const COL_ISSUER: usize = 2; // C
const COL_CORRECTION_TYPE: usize = 3; // D
const COL_CORRECTION_RATE: usize = 4; // E
const COL_MATURITY_DATE: usize = 5; // F
const COL_SERIES: usize = 6; // G
const COL_SECURITY_TYPE: usize = 7; // H
const COL_COUPON_RATE: usize = 8; // I
const COL_CREDIT_RISK: usize = 9; // J
const COL_DURATION: usize = 15; // P
const COL_NTNB_REFERENCE: usize = 17; // R
const COL_NTNB_DATE: usize = 18; // S

/// `DD/MM/YYYY` first, ISO-8601 as the fallback, None otherwise.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}

/// Accepts either `,` or `.` as the decimal separator.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let canonical = text.trim().replace(',', ".");
    Decimal::from_str(&canonical).ok()
}

pub fn parse_duration(text: &str) -> Option<i64> {
    parse_decimal(text).and_then(|d| d.trunc().to_i64())
}

pub fn classify_security_type(text: &str) -> Option<SecurityType> {
    match text.trim().to_lowercase().as_str() {
        "cri" => Some(SecurityType::Cri),
        "cra" => Some(SecurityType::Cra),
        "debênture" | "debenture" => Some(SecurityType::Debenture),
        "debênture plus" | "debenture plus" => Some(SecurityType::DebenturePlus),
        _ => None,
    }
}

/// Benchmark derivation: an NTN-B reference date wins outright; otherwise
/// the correction-rate-type text is classified against a fixed vocabulary.
pub fn classify_benchmark(
    has_ntnb_date: bool,
    correction_type: Option<&str>,
) -> Option<BenchmarkIndex> {
    if has_ntnb_date {
        return Some(BenchmarkIndex::Ipca);
    }
    match correction_type?.trim().to_lowercase().as_str() {
        "di aditivo" | "di spread" => Some(BenchmarkIndex::DiPlus),
        "di multiplicativo" | "di percentual" => Some(BenchmarkIndex::DiMultiple),
        "cdi" | "di" => Some(BenchmarkIndex::Cdi),
        "ipca spread" | "ipca" => Some(BenchmarkIndex::Ipca),
        "igp-m" => Some(BenchmarkIndex::IgpM),
        _ => None,
    }
}

/// One worksheet row to typed attributes; None discards a fully empty row.
pub fn normalize_row(row: &SheetRow, source: SyncSource) -> Option<NormalizedSecurity> {
    if row.is_empty() {
        return None;
    }
    let ntnb_reference_date = row.text(COL_NTNB_DATE).as_deref().and_then(parse_date);
    let mut rec = NormalizedSecurity::empty(row.index, source);
    rec.code = row.text(COL_CODE);
    rec.series = row
        .text(COL_SERIES)
        .unwrap_or_else(|| DEFAULT_SERIES.to_string());
    rec.issuer = row.text(COL_ISSUER);
    rec.credit_risk = row.text(COL_CREDIT_RISK);
    rec.security_type = row
        .text(COL_SECURITY_TYPE)
        .as_deref()
        .and_then(classify_security_type);
    rec.benchmark_index = classify_benchmark(
        ntnb_reference_date.is_some(),
        row.text(COL_CORRECTION_TYPE).as_deref(),
    );
    rec.coupon_rate = row.text(COL_COUPON_RATE).as_deref().and_then(parse_decimal);
    rec.correction_rate = row
        .text(COL_CORRECTION_RATE)
        .as_deref()
        .and_then(parse_decimal);
    rec.duration_days = row.text(COL_DURATION).as_deref().and_then(parse_duration);
    rec.reference_date = row.text(COL_REFERENCE_DATE).as_deref().and_then(parse_date);
    rec.maturity_date = row.text(COL_MATURITY_DATE).as_deref().and_then(parse_date);
    rec.ntnb_reference = row.text(COL_NTNB_REFERENCE);
    rec.ntnb_reference_date = ntnb_reference_date;
    Some(rec)
}

/// Feed records arrive already structured as field/value maps and bypass
/// the extractor; the same soft-parse rules apply.
pub fn normalize_feed_record(
    position: u32,
    record: &HashMap<String, String>,
) -> Option<NormalizedSecurity> {
    let field = |name: &str| -> Option<String> {
        record
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    if record.values().all(|v| v.trim().is_empty()) {
        return None;
    }
    let ntnb_reference_date = field("ntnb_reference_date").as_deref().and_then(parse_date);
    let mut rec = NormalizedSecurity::empty(position, SyncSource::Api);
    rec.code = field("code");
    rec.series = field("series").unwrap_or_else(|| DEFAULT_SERIES.to_string());
    rec.issuer = field("issuer");
    rec.credit_risk = field("credit_risk");
    rec.security_type = field("security_type")
        .as_deref()
        .and_then(classify_security_type);
    rec.benchmark_index = classify_benchmark(
        ntnb_reference_date.is_some(),
        field("correction_rate_type").as_deref(),
    );
    rec.coupon_rate = field("coupon_rate").as_deref().and_then(parse_decimal);
    rec.correction_rate = field("correction_rate").as_deref().and_then(parse_decimal);
    rec.duration_days = field("duration").as_deref().and_then(parse_duration);
    rec.reference_date = field("reference_date").as_deref().and_then(parse_date);
    rec.maturity_date = field("maturity_date").as_deref().and_then(parse_date);
    rec.ntnb_reference = field("ntnb_reference");
    rec.ntnb_reference_date = ntnb_reference_date;
    Some(rec)
}
