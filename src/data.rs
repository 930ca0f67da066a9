use std::fmt;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::ColumnType;

pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";
pub const CANONICAL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Value {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Date(d) => d.format(CANONICAL_DATE_FORMAT).to_string(),
            Value::DateTime(dt) | Value::Timestamp(dt) => {
                dt.format(CANONICAL_DATETIME_FORMAT).to_string()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%Y%m%d",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = parse_naive_date(value) {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Best-effort parse used for injected `*_date`/`*_time` metadata fields.
/// Unparseable values fall back to the Unix epoch rather than failing the row.
pub fn parse_flexible_datetime(value: &str) -> NaiveDateTime {
    parse_naive_datetime(value.trim()).unwrap_or_else(|_| epoch_datetime())
}

pub fn epoch_datetime() -> NaiveDateTime {
    NaiveDateTime::UNIX_EPOCH
}

pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Coerces a raw cell into the column's storage type. Empty cells become
/// `None` (SQL NULL); anything unparseable is an error the caller reports
/// against that row.
pub fn coerce_typed_value(value: &str, ty: &ColumnType) -> Result<Option<Value>> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        ColumnType::String => Value::String(value.to_string()),
        ColumnType::Integer => {
            let parsed: i64 = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Value::Integer(parsed)
        }
        ColumnType::Decimal(_) => {
            let parsed: Decimal = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as decimal"))?;
            Value::Decimal(parsed)
        }
        ColumnType::Date { format } => {
            let parsed = NaiveDate::parse_from_str(value.trim(), format)
                .with_context(|| format!("Failed to parse '{value}' as date ({format})"))?;
            Value::Date(parsed)
        }
        ColumnType::DateTime { format } => {
            let parsed = NaiveDateTime::parse_from_str(value.trim(), format)
                .with_context(|| format!("Failed to parse '{value}' as datetime ({format})"))?;
            Value::DateTime(parsed)
        }
        ColumnType::Timestamp => {
            let parsed = parse_naive_datetime(value.trim())?;
            Value::Timestamp(parsed)
        }
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DecimalSpec;
    use chrono::NaiveDate;

    #[test]
    fn normalize_column_name_replaces_non_alphanumeric() {
        assert_eq!(normalize_column_name("Order ID"), "order_id");
        assert_eq!(normalize_column_name("ecom/mo\\to"), "ecom_mo_to");
        assert_eq!(normalize_column_name(" Report Date "), "report_date");
    }

    #[test]
    fn parse_naive_date_supports_compact_format() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(parse_naive_date("20200101").unwrap(), expected);
        assert_eq!(parse_naive_date("2020-01-01").unwrap(), expected);
    }

    #[test]
    fn parse_flexible_datetime_falls_back_to_epoch() {
        assert_eq!(parse_flexible_datetime("not-a-date"), epoch_datetime());
        let parsed = parse_flexible_datetime("20200101");
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2020-01-01");
    }

    #[test]
    fn coerce_typed_value_handles_empty_and_integer_inputs() {
        assert_eq!(coerce_typed_value("", &ColumnType::Integer).unwrap(), None);
        assert_eq!(
            coerce_typed_value("42", &ColumnType::Integer).unwrap(),
            Some(Value::Integer(42))
        );
        assert!(coerce_typed_value("4x", &ColumnType::Integer).is_err());
    }

    #[test]
    fn coerce_typed_value_respects_declared_date_format() {
        let ty = ColumnType::Date {
            format: "%d.%m.%Y".to_string(),
        };
        let parsed = coerce_typed_value("07.01.2020", &ty).unwrap().unwrap();
        assert_eq!(
            parsed,
            Value::Date(NaiveDate::from_ymd_opt(2020, 1, 7).unwrap())
        );
        assert!(coerce_typed_value("2020-01-07", &ty).is_err());
    }

    #[test]
    fn coerce_typed_value_parses_decimals() {
        let ty = ColumnType::Decimal(DecimalSpec::default());
        let parsed = coerce_typed_value("9.50", &ty).unwrap().unwrap();
        assert_eq!(parsed.as_display(), "9.50");
    }
}
