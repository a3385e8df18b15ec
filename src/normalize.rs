//! Cell coercion functions used by [`ColumnSpec`](crate::spec::ColumnSpec).
//!
//! Every normalizer takes the raw cell text and returns a typed [`Value`] or a
//! [`FieldNormalizationError`]; none of them panic.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::FieldNormalizationError;
use crate::model::Value;

pub type Normalizer = fn(&str) -> Result<Value, FieldNormalizationError>;

static MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(?\s*(\d{1,2})\s*/\s*(\d{2}|\d{4})\s*\)?$").expect("month/year regex is valid")
});

static CONTINUED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*cont(?:inued|'d|\.)?\s*\)").expect("continued regex is valid")
});

const CURRENCY_SYMBOLS: [char; 4] = ['$', '£', '€', '¥'];
const NUMERIC_SUFFIXES: [&str; 1] = ["(base)"];

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips currency and percent symbols, thousands separators, whitespace and
/// the manual's `(base)` annotation, leaving something `Decimal` can parse.
fn numeric_core(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    for suffix in NUMERIC_SUFFIXES {
        if let Some(stripped) = text.strip_suffix(suffix) {
            text = stripped.to_string();
        }
    }

    text.chars()
        .filter(|ch| {
            !ch.is_whitespace() && *ch != ',' && *ch != '%' && !CURRENCY_SYMBOLS.contains(ch)
        })
        .collect()
}

fn parse_decimal(raw: &str) -> Result<Decimal, FieldNormalizationError> {
    if raw.trim().is_empty() {
        return Err(FieldNormalizationError::Empty);
    }

    let core = numeric_core(raw);
    if core.is_empty() {
        return Err(FieldNormalizationError::NotNumeric(raw.trim().to_string()));
    }

    Decimal::from_str(&core).map_err(|_| FieldNormalizationError::NotNumeric(raw.trim().to_string()))
}

/// Free text with runs of whitespace collapsed.
///
/// # Errors
///
/// Returns [`FieldNormalizationError::Empty`] for blank cells.
pub fn text(raw: &str) -> Result<Value, FieldNormalizationError> {
    let cleaned = collapse_whitespace(raw);
    if cleaned.is_empty() {
        return Err(FieldNormalizationError::Empty);
    }
    Ok(Value::Text(cleaned))
}

/// Region or state heading, without the `(Continued)` marker the manual puts
/// on headings that carry over from a previous column or page.
///
/// # Errors
///
/// Returns [`FieldNormalizationError::Empty`] when nothing but the marker is
/// left.
pub fn region_name(raw: &str) -> Result<Value, FieldNormalizationError> {
    let without_marker = CONTINUED_RE.replace_all(raw, " ");
    text(&without_marker)
}

/// Upper-case region heading such as `ALBERTA` or `NEW YORK (Continued)`,
/// returned without the continuation marker. Text with digits, percent signs
/// or lower-case letters is not a heading.
#[must_use]
pub fn region_heading(raw: &str) -> Option<String> {
    let Ok(Value::Text(name)) = region_name(raw) else {
        return None;
    };
    let heading = name.chars().any(char::is_alphabetic)
        && !name
            .chars()
            .any(|ch| ch.is_ascii_digit() || ch == '%' || ch.is_lowercase());
    heading.then_some(name)
}

/// Fixed-point decimal; `"$1,234.50"`, `"1.05%"` and `"1.000 (base)"` all
/// parse.
///
/// # Errors
///
/// Returns [`FieldNormalizationError::NotNumeric`] when the cleaned text is not
/// a number.
pub fn decimal(raw: &str) -> Result<Value, FieldNormalizationError> {
    parse_decimal(raw).map(Value::Decimal)
}

/// Percentage as a fraction: `"12.5%"` becomes `0.125`.
///
/// # Errors
///
/// Same as [`decimal`].
pub fn percent(raw: &str) -> Result<Value, FieldNormalizationError> {
    let value = parse_decimal(raw)?;
    Ok(Value::Decimal(value / Decimal::ONE_HUNDRED))
}

/// Whole number, thousands separators allowed. `"1,500.0"` is accepted,
/// `"1,500.5"` is not.
///
/// # Errors
///
/// Returns [`FieldNormalizationError::NotNumeric`] for fractional or
/// non-numeric text.
pub fn integer(raw: &str) -> Result<Value, FieldNormalizationError> {
    let value = parse_decimal(raw)?;
    if !value.fract().is_zero() {
        return Err(FieldNormalizationError::NotNumeric(raw.trim().to_string()));
    }
    value
        .to_i64()
        .map(Value::Integer)
        .ok_or_else(|| FieldNormalizationError::NotNumeric(raw.trim().to_string()))
}

/// Effective date column labels such as `(11/24)` or `8/2024`, normalized to
/// `YYYY-MM`. Two-digit years below 50 are 20xx.
///
/// # Errors
///
/// Returns [`FieldNormalizationError::InvalidDate`] for anything else.
pub fn effective_date(raw: &str) -> Result<Value, FieldNormalizationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FieldNormalizationError::Empty);
    }

    let invalid = || FieldNormalizationError::InvalidDate(trimmed.to_string());
    let captures = MONTH_YEAR_RE.captures(trimmed).ok_or_else(invalid)?;
    let month: u32 = captures[1].parse().map_err(|_| invalid())?;
    let year_text = &captures[2];
    let mut year: i32 = year_text.parse().map_err(|_| invalid())?;
    if year_text.len() == 2 {
        year += if year < 50 { 2000 } else { 1900 };
    }

    let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    Ok(Value::Text(date.format("%Y-%m").to_string()))
}

/// Building class letter used by the cost tables.
///
/// # Errors
///
/// Returns [`FieldNormalizationError::Unrecognized`] for anything other than
/// A, B, C, D or S.
pub fn building_class(raw: &str) -> Result<Value, FieldNormalizationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FieldNormalizationError::Empty);
    }
    let upper = trimmed.to_ascii_uppercase();
    match upper.as_str() {
        "A" | "B" | "C" | "D" | "S" => Ok(Value::Text(upper)),
        _ => Err(FieldNormalizationError::Unrecognized(trimmed.to_string())),
    }
}

/// True when the text would survive [`decimal`].
#[must_use]
pub fn looks_numeric(raw: &str) -> bool {
    parse_decimal(raw).is_ok()
}
