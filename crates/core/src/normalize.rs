//! Pure, total normalizers turning raw source fields into typed values.
//!
//! Every function here either returns the cleaned value or the
//! [`RejectionReason`] the ingestion report tallies. None of them panic.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::customer::Phone;
use crate::domain::order::OrderReference;
use crate::domain::source::scalar_text;

pub const MIN_PHONE_DIGITS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InvalidName,
    InvalidPhone,
    InvalidDate,
    InvalidAmount,
    InvalidOrderCount,
    InvalidReference,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidName => "invalid_name",
            Self::InvalidPhone => "invalid_phone",
            Self::InvalidDate => "invalid_date",
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidOrderCount => "invalid_order_count",
            Self::InvalidReference => "invalid_reference",
        }
    }
}

/// Native date encoding of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateFormat {
    /// `dd/mm/yyyy`, as in the CSV export.
    DayMonthYear,
    /// ISO-8601 timestamp or calendar date, as in the order API.
    Iso8601,
}

pub fn normalize_phone(raw: &str) -> Result<Phone, RejectionReason> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(RejectionReason::InvalidPhone);
    }
    Ok(Phone::from_canonical(digits))
}

pub fn normalize_name(raw: &str) -> Result<String, RejectionReason> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RejectionReason::InvalidName);
    }
    Ok(trimmed.to_string())
}

pub fn normalize_local_date(raw: &str, format: DateFormat) -> Result<NaiveDate, RejectionReason> {
    match format {
        DateFormat::DayMonthYear => parse_day_month_year(raw),
        DateFormat::Iso8601 => parse_iso_local_date(raw),
    }
}

/// Instant of an ISO-8601 timestamp. Timestamps without an offset are read as UTC
/// and a bare calendar date as its UTC midnight.
pub fn normalize_timestamp(raw: &str) -> Result<DateTime<Utc>, RejectionReason> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Some(naive) = parse_naive_timestamp(trimmed) {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or(RejectionReason::InvalidDate)
}

pub fn normalize_monetary(raw: &str) -> Result<Decimal, RejectionReason> {
    let stripped: String = raw
        .replace("R$", "")
        .chars()
        .filter(|ch| !ch.is_whitespace() && !matches!(ch, '$' | '€' | '£'))
        .collect();
    if stripped.is_empty()
        || !stripped.chars().all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | ',' | '-' | '+'))
    {
        return Err(RejectionReason::InvalidAmount);
    }

    let canonical = canonical_decimal_separator(&stripped);
    let value = Decimal::from_str(&canonical).map_err(|_| RejectionReason::InvalidAmount)?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(RejectionReason::InvalidAmount);
    }
    Ok(value.abs())
}

/// Monetary value from untrusted JSON: numbers or currency strings.
pub fn normalize_monetary_value(raw: &Value) -> Result<Decimal, RejectionReason> {
    match raw {
        Value::Number(number) => {
            let text = number.to_string();
            let value = Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|_| RejectionReason::InvalidAmount)?;
            if value.is_sign_negative() && !value.is_zero() {
                return Err(RejectionReason::InvalidAmount);
            }
            Ok(value.abs())
        }
        Value::String(text) => normalize_monetary(text),
        _ => Err(RejectionReason::InvalidAmount),
    }
}

/// Declared order count of a CSV row (`total` column).
pub fn normalize_order_count(raw: &str) -> Result<u32, RejectionReason> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(RejectionReason::InvalidOrderCount);
    }
    trimmed.parse::<u32>().map_err(|_| RejectionReason::InvalidOrderCount)
}

pub fn normalize_reference(raw: &Value) -> Result<OrderReference, RejectionReason> {
    scalar_text(raw).map(OrderReference).ok_or(RejectionReason::InvalidReference)
}

/// Trimmed text, `None` when blank.
pub fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|value| !value.is_empty()).map(ToString::to_string)
}

/// Joins street, `nº <number>`, complement, neighborhood and city with `", "`,
/// skipping blank parts.
pub fn compose_address(
    street: Option<&str>,
    number: Option<&str>,
    complement: Option<&str>,
    neighborhood: Option<&str>,
    city: Option<&str>,
) -> Option<String> {
    let number = optional_text(number).map(|number| format!("nº {number}"));
    let parts: Vec<String> = [
        optional_text(street),
        number,
        optional_text(complement),
        optional_text(neighborhood),
        optional_text(city),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn parse_day_month_year(raw: &str) -> Result<NaiveDate, RejectionReason> {
    // Spreadsheet exports sometimes append a time; only the date token counts.
    let token = raw.split_whitespace().next().ok_or(RejectionReason::InvalidDate)?;
    let mut parts = token.split('/');
    let (Some(day), Some(month), Some(year), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RejectionReason::InvalidDate);
    };

    let day = parse_component(day, 1..=2)?;
    let month = parse_component(month, 1..=2)?;
    let year = parse_component(year, 4..=4)?;
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or(RejectionReason::InvalidDate)
}

fn parse_component(raw: &str, digits: std::ops::RangeInclusive<usize>) -> Result<u32, RejectionReason> {
    if !digits.contains(&raw.len()) || !raw.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(RejectionReason::InvalidDate);
    }
    raw.parse::<u32>().map_err(|_| RejectionReason::InvalidDate)
}

fn parse_iso_local_date(raw: &str) -> Result<NaiveDate, RejectionReason> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.date_naive());
    }
    if let Some(naive) = parse_naive_timestamp(trimmed) {
        return Ok(naive.date());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| RejectionReason::InvalidDate)
}

fn parse_naive_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn canonical_decimal_separator(raw: &str) -> String {
    let last_comma = raw.rfind(',');
    let last_dot = raw.rfind('.');
    match (last_comma, last_dot) {
        // 1.234,56
        (Some(comma), Some(dot)) if comma > dot => raw.replace('.', "").replace(',', "."),
        // 1,234.56
        (Some(_), Some(_)) => raw.replace(',', ""),
        (Some(_), None) if raw.matches(',').count() == 1 => raw.replace(',', "."),
        (Some(_), None) => raw.replace(',', ""),
        (None, Some(_)) if raw.matches('.').count() > 1 => raw.replace('.', ""),
        _ => raw.to_string(),
    }
}
