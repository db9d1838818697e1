//! SQL value types bound into destination tables.
//!
//! Values are produced by the coercer from extract text, one row at a time,
//! and buffered in a [`Batch`] until the loader submits them.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Destination column type as reported by the database for one bind parameter.
///
/// This is the closed set of kinds the coercer knows how to produce; drivers
/// map their native type names onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    Timestamp,
    Boolean,
    Binary,
}

impl ColumnType {
    /// Lower-case name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::SmallInt => "smallint",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
            ColumnType::Binary => "binary",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered column types, aligned 1:1 with an INSERT statement's placeholders.
pub type ColumnTypes = Vec<ColumnType>;

/// A typed value ready for binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with the column type it is bound to.
    Null(ColumnType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Column type this value binds as.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => ColumnType::Boolean,
            SqlValue::I16(_) => ColumnType::SmallInt,
            SqlValue::I32(_) => ColumnType::Integer,
            SqlValue::I64(_) => ColumnType::BigInt,
            SqlValue::F32(_) => ColumnType::Float,
            SqlValue::F64(_) => ColumnType::Double,
            SqlValue::Text(_) => ColumnType::Text,
            SqlValue::Bytes(_) => ColumnType::Binary,
            SqlValue::Decimal(_) => ColumnType::Decimal,
            SqlValue::Date(_) => ColumnType::Date,
            SqlValue::Time(_) => ColumnType::Time,
            SqlValue::DateTime(_) => ColumnType::Timestamp,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

/// One coerced extract row, positionally aligned with the column types.
pub type CoercedRow = Vec<SqlValue>;

/// Rows awaiting a single submission.
#[derive(Debug)]
pub struct Batch {
    rows: Vec<CoercedRow>,
    capacity: usize,
}

/// Default number of rows per submission.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

impl Batch {
    /// Create an empty batch that reports full at `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Vec::with_capacity(capacity.min(DEFAULT_BATCH_SIZE)),
            capacity,
        }
    }

    /// Append a row.
    pub fn push(&mut self, row: CoercedRow) {
        self.rows.push(row);
    }

    /// Whether the threshold has been reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    /// Pending rows in submission order.
    pub fn rows(&self) -> &[CoercedRow] {
        &self.rows
    }

    /// Drop all pending rows, keeping the allocation.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row threshold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
