//! Text-to-value coercion for extract rows.
//!
//! Each field is trimmed; an empty field is NULL whatever the column type.
//! Otherwise the column type picks the parser. Temporal columns use the
//! [`DateFormat`] chosen for the load.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{CoercedRow, ColumnType, SqlValue};
use crate::error::{LoadError, Result};

/// Date pattern used to parse temporal fields, in chrono `strftime` syntax.
///
/// Patterns without a time component parse to midnight. Input past the end
/// of the pattern is ignored when it starts at a whitespace or `T`
/// boundary, so `2023-03-01 00:00:00.0` reads as a date under `%Y-%m-%d`.
/// A two-digit `%y` also accepts a four-digit year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateFormat(Cow<'static, str>);

impl DateFormat {
    /// Observation fact extracts: `01-JAN-20`.
    pub const OBSERVATION_FACT: DateFormat = DateFormat(Cow::Borrowed("%d-%b-%y"));

    /// Ontology / metadata extracts: `2020-01-01`.
    pub const METADATA: DateFormat = DateFormat(Cow::Borrowed("%Y-%m-%d"));

    /// Full timestamps with milliseconds: `2020-01-01 13:45:00.000`.
    pub const TIMESTAMP: DateFormat = DateFormat(Cow::Borrowed("%Y-%m-%d %H:%M:%S%.3f"));

    /// Custom pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        DateFormat(Cow::Owned(pattern.into()))
    }

    /// The chrono pattern.
    pub fn pattern(&self) -> &str {
        &self.0
    }

    /// Reject patterns chrono cannot interpret.
    pub fn validate(&self) -> Result<()> {
        if StrftimeItems::new(self.pattern()).any(|item| matches!(item, Item::Error)) {
            return Err(LoadError::Config(format!(
                "invalid date format '{}'",
                self.pattern()
            )));
        }
        Ok(())
    }

    /// Parse text into a timestamp.
    pub fn parse(&self, text: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
        match parse_leading(text, self.pattern()) {
            Err(e) if self.pattern().contains("%y") => {
                parse_leading(text, &self.pattern().replace("%y", "%Y")).map_err(|_| e)
            }
            parsed => parsed,
        }
    }
}

/// Parse `text` with `pattern`, allowing trailing input after a boundary.
fn parse_leading(text: &str, pattern: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    let full_err = match NaiveDateTime::parse_from_str(text, pattern) {
        Ok(dt) => return Ok(dt),
        Err(e) => e,
    };
    if let Ok(date) = NaiveDate::parse_from_str(text, pattern) {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    let at_boundary = |rest: &str| rest.starts_with(|c: char| c.is_whitespace() || c == 'T');
    if let Ok((dt, rest)) = NaiveDateTime::parse_and_remainder(text, pattern) {
        if at_boundary(rest) {
            return Ok(dt);
        }
    }
    match NaiveDate::parse_and_remainder(text, pattern) {
        Ok((date, rest)) if at_boundary(rest) => Ok(date.and_time(NaiveTime::MIN)),
        _ => Err(full_err),
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        DateFormat::METADATA
    }
}

/// Coerce one row of raw fields against the column types.
///
/// Fields past the last column are dropped; columns past the last field are
/// bound as NULL. The first field that fails to parse fails the whole row.
pub fn coerce_row<S: AsRef<str>>(
    types: &[ColumnType],
    fields: &[S],
    date_format: &DateFormat,
) -> Result<CoercedRow> {
    if fields.len() > types.len() {
        debug!(
            "Row has {} fields for {} columns, truncating",
            fields.len(),
            types.len()
        );
    }

    types
        .iter()
        .enumerate()
        .map(|(i, column_type)| match fields.get(i) {
            Some(field) => coerce_field(i + 1, *column_type, field.as_ref(), date_format),
            None => Ok(SqlValue::Null(*column_type)),
        })
        .collect()
}

/// Coerce a single field. `position` is 1-based and only used for errors.
pub fn coerce_field(
    position: usize,
    column_type: ColumnType,
    raw: &str,
    date_format: &DateFormat,
) -> Result<SqlValue> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(SqlValue::Null(column_type));
    }

    let fail = |message: String| LoadError::Coercion {
        position,
        column_type,
        value: value.to_string(),
        message,
    };

    let coerced = match column_type {
        ColumnType::Text => SqlValue::Text(value.to_string()),
        ColumnType::SmallInt => SqlValue::I16(value.parse().map_err(|e| fail(format!("{}", e)))?),
        ColumnType::Integer => SqlValue::I32(value.parse().map_err(|e| fail(format!("{}", e)))?),
        ColumnType::BigInt => SqlValue::I64(value.parse().map_err(|e| fail(format!("{}", e)))?),
        ColumnType::Float => SqlValue::F32(value.parse().map_err(|e| fail(format!("{}", e)))?),
        ColumnType::Double => SqlValue::F64(value.parse().map_err(|e| fail(format!("{}", e)))?),
        ColumnType::Decimal => SqlValue::Decimal(
            Decimal::from_str(value)
                .or_else(|_| Decimal::from_scientific(value))
                .map_err(|e| fail(format!("{}", e)))?,
        ),
        ColumnType::Date | ColumnType::Time | ColumnType::Timestamp => {
            let parsed = date_format.parse(value).map_err(|e| {
                fail(format!("{} (expected pattern {})", e, date_format.pattern()))
            })?;
            match column_type {
                ColumnType::Date => SqlValue::Date(parsed.date()),
                ColumnType::Time => SqlValue::Time(parsed.time()),
                _ => SqlValue::DateTime(parsed),
            }
        }
        ColumnType::Boolean => SqlValue::Bool(value == "1"),
        ColumnType::Binary => SqlValue::Bytes(value.as_bytes().to_vec()),
    };

    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_blank_fields_are_null_for_every_type() {
        let all = [
            ColumnType::Text,
            ColumnType::SmallInt,
            ColumnType::Integer,
            ColumnType::BigInt,
            ColumnType::Float,
            ColumnType::Double,
            ColumnType::Decimal,
            ColumnType::Date,
            ColumnType::Time,
            ColumnType::Timestamp,
            ColumnType::Boolean,
            ColumnType::Binary,
        ];
        let fields = vec!["   "; all.len()];
        let row = coerce_row(&all, &fields, &DateFormat::METADATA).unwrap();
        for (value, ty) in row.iter().zip(all.iter()) {
            assert_eq!(value, &SqlValue::Null(*ty));
        }
    }

    #[test]
    fn test_text_is_trimmed_not_validated() {
        let v = coerce_field(1, ColumnType::Text, "  \\i2b2\\Diagnoses\\ ", &DateFormat::METADATA)
            .unwrap();
        assert_eq!(v, SqlValue::Text("\\i2b2\\Diagnoses\\".to_string()));
    }

    #[test]
    fn test_integer_widths() {
        let f = DateFormat::METADATA;
        assert_eq!(coerce_field(1, ColumnType::SmallInt, "7", &f).unwrap(), SqlValue::I16(7));
        assert_eq!(coerce_field(1, ColumnType::Integer, "-42", &f).unwrap(), SqlValue::I32(-42));
        assert_eq!(
            coerce_field(1, ColumnType::BigInt, "9000000000", &f).unwrap(),
            SqlValue::I64(9_000_000_000)
        );

        // Out of range for the column width
        assert!(coerce_field(1, ColumnType::SmallInt, "40000", &f).is_err());
        assert!(coerce_field(1, ColumnType::Integer, "9000000000", &f).is_err());
        assert!(coerce_field(1, ColumnType::Integer, "12a", &f).is_err());
    }

    #[test]
    fn test_floating_point() {
        let f = DateFormat::METADATA;
        assert_eq!(coerce_field(1, ColumnType::Float, "1.5", &f).unwrap(), SqlValue::F32(1.5));
        assert_eq!(coerce_field(1, ColumnType::Double, "2.25", &f).unwrap(), SqlValue::F64(2.25));
        assert!(coerce_field(1, ColumnType::Double, "two", &f).is_err());
    }

    #[test]
    fn test_decimal_plain_and_scientific() {
        let f = DateFormat::METADATA;
        assert_eq!(
            coerce_field(1, ColumnType::Decimal, "123.450", &f).unwrap(),
            SqlValue::Decimal(Decimal::from_str("123.450").unwrap())
        );
        assert_eq!(
            coerce_field(1, ColumnType::Decimal, "1.5e2", &f).unwrap(),
            SqlValue::Decimal(Decimal::from(150))
        );
        assert!(coerce_field(1, ColumnType::Decimal, "1.2.3", &f).is_err());
    }

    #[test]
    fn test_boolean_only_literal_one_is_true() {
        let f = DateFormat::METADATA;
        assert_eq!(coerce_field(1, ColumnType::Boolean, "1", &f).unwrap(), SqlValue::Bool(true));
        for other in ["0", "true", "TRUE", "yes", "Y", "2"] {
            assert_eq!(
                coerce_field(1, ColumnType::Boolean, other, &f).unwrap(),
                SqlValue::Bool(false),
                "{} should coerce to false",
                other
            );
        }
    }

    #[test]
    fn test_binary_is_raw_bytes() {
        let v = coerce_field(1, ColumnType::Binary, "<xml/>", &DateFormat::METADATA).unwrap();
        assert_eq!(v, SqlValue::Bytes(b"<xml/>".to_vec()));
    }

    #[test]
    fn test_fact_date_format_two_digit_year() {
        let f = DateFormat::OBSERVATION_FACT;
        assert_eq!(
            coerce_field(1, ColumnType::Date, "01-Jan-20", &f).unwrap(),
            SqlValue::Date(date(2020, 1, 1))
        );
        assert_eq!(
            coerce_field(1, ColumnType::Date, "15-MAR-99", &f).unwrap(),
            SqlValue::Date(date(1999, 3, 15))
        );
        assert_eq!(
            coerce_field(1, ColumnType::Timestamp, "01-Jan-20", &f).unwrap(),
            SqlValue::DateTime(date(2020, 1, 1).and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn test_metadata_date_format() {
        let f = DateFormat::METADATA;
        assert_eq!(
            coerce_field(1, ColumnType::Timestamp, "2023-03-01", &f).unwrap(),
            SqlValue::DateTime(date(2023, 3, 1).and_time(NaiveTime::MIN))
        );
        // Fact-style dates do not parse with the metadata format
        assert!(coerce_field(1, ColumnType::Date, "01-Jan-20", &f).is_err());
    }

    #[test]
    fn test_trailing_time_after_date_pattern_is_ignored() {
        let f = DateFormat::METADATA;
        assert_eq!(
            coerce_field(1, ColumnType::Timestamp, "2023-03-01 00:00:00.0", &f).unwrap(),
            SqlValue::DateTime(date(2023, 3, 1).and_time(NaiveTime::MIN))
        );
        assert_eq!(
            coerce_field(1, ColumnType::Date, "2023-03-01T12:30:00", &f).unwrap(),
            SqlValue::Date(date(2023, 3, 1))
        );
        // Trailing junk glued to the date is still an error
        assert!(coerce_field(1, ColumnType::Date, "2023-03-01x", &f).is_err());
    }

    #[test]
    fn test_fact_format_accepts_four_digit_year() {
        let f = DateFormat::OBSERVATION_FACT;
        assert_eq!(
            coerce_field(1, ColumnType::Date, "01-Jan-2020", &f).unwrap(),
            SqlValue::Date(date(2020, 1, 1))
        );
        assert_eq!(
            coerce_field(1, ColumnType::Timestamp, "15-Mar-2021 08:15:00", &f).unwrap(),
            SqlValue::DateTime(date(2021, 3, 15).and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn test_date_format_validation() {
        assert!(DateFormat::OBSERVATION_FACT.validate().is_ok());
        assert!(DateFormat::METADATA.validate().is_ok());
        assert!(DateFormat::TIMESTAMP.validate().is_ok());
        assert!(matches!(
            DateFormat::new("%Y-%Q").validate(),
            Err(LoadError::Config(_))
        ));
    }

    #[test]
    fn test_timestamp_format_keeps_time() {
        let f = DateFormat::TIMESTAMP;
        let v = coerce_field(1, ColumnType::Time, "2023-03-01 13:45:10.250", &f).unwrap();
        assert_eq!(
            v,
            SqlValue::Time(NaiveTime::from_hms_milli_opt(13, 45, 10, 250).unwrap())
        );
    }

    #[test]
    fn test_short_row_pads_with_typed_nulls() {
        let types = [ColumnType::Integer, ColumnType::Text, ColumnType::Date];
        let row = coerce_row(&types, &["5"], &DateFormat::METADATA).unwrap();
        assert_eq!(
            row,
            vec![
                SqlValue::I32(5),
                SqlValue::Null(ColumnType::Text),
                SqlValue::Null(ColumnType::Date),
            ]
        );
    }

    #[test]
    fn test_long_row_is_truncated() {
        let types = [ColumnType::Integer, ColumnType::Text];
        let row = coerce_row(&types, &["1", "a", "extra", "more"], &DateFormat::METADATA).unwrap();
        assert_eq!(row, vec![SqlValue::I32(1), SqlValue::Text("a".to_string())]);
    }

    #[test]
    fn test_row_error_reports_position() {
        let types = [ColumnType::Integer, ColumnType::Integer];
        let err = coerce_row(&types, &["1", "x"], &DateFormat::METADATA).unwrap_err();
        match err {
            LoadError::Coercion {
                position,
                column_type,
                value,
                ..
            } => {
                assert_eq!(position, 2);
                assert_eq!(column_type, ColumnType::Integer);
                assert_eq!(value, "x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_date_format_serde_is_plain_pattern() {
        let f: DateFormat = serde_yaml::from_str("\"%d-%b-%y\"").unwrap();
        assert_eq!(f, DateFormat::OBSERVATION_FACT);
    }
}
