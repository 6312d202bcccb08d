//! Typed decoding of single stored values.
//!
//! SQLite is dynamically typed: a column declared `INTEGER` may hold text
//! written by an older version, and timestamps are always text. Reads name the
//! type they expect through [`FromScalar`], and the stored value is coerced to
//! it or rejected with [`StorageError::TypeCoercion`].

use chrono::NaiveDateTime;
use sqlx::{ColumnIndex, Row, TypeInfo, ValueRef, sqlite::SqliteRow};

use super::StorageError;
use crate::domain::{format_timestamp, parse_timestamp};

/// The semantic type a read expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Integer,
    BigInteger,
    Boolean,
    Timestamp,
    Text,
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScalarKind::Integer => "32-bit integer",
            ScalarKind::BigInteger => "64-bit integer",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Timestamp => "timestamp",
            ScalarKind::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// A non-null value as SQLite stored it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawScalar {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawScalar {
    fn describe(&self) -> String {
        match self {
            RawScalar::Integer(v) => format!("integer {}", v),
            RawScalar::Real(v) => format!("real {}", v),
            RawScalar::Text(v) => format!("text {:?}", v),
        }
    }

    fn mismatch(&self, expected: ScalarKind) -> StorageError {
        StorageError::TypeCoercion {
            expected,
            found: self.describe(),
        }
    }

    fn as_whole_number(&self) -> Option<i64> {
        match self {
            RawScalar::Integer(v) => Some(*v),
            RawScalar::Real(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Some(*v as i64)
            }
            RawScalar::Text(v) => v.trim().parse().ok(),
            RawScalar::Real(_) => None,
        }
    }
}

/// A Rust type that can be decoded from one stored value.
pub trait FromScalar: Sized {
    const KIND: ScalarKind;

    fn from_raw(raw: RawScalar) -> Result<Self, StorageError>;
}

impl FromScalar for i64 {
    const KIND: ScalarKind = ScalarKind::BigInteger;

    fn from_raw(raw: RawScalar) -> Result<Self, StorageError> {
        raw.as_whole_number().ok_or_else(|| raw.mismatch(Self::KIND))
    }
}

impl FromScalar for i32 {
    const KIND: ScalarKind = ScalarKind::Integer;

    fn from_raw(raw: RawScalar) -> Result<Self, StorageError> {
        raw.as_whole_number()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| raw.mismatch(Self::KIND))
    }
}

impl FromScalar for bool {
    const KIND: ScalarKind = ScalarKind::Boolean;

    fn from_raw(raw: RawScalar) -> Result<Self, StorageError> {
        match &raw {
            RawScalar::Text(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            RawScalar::Text(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            _ => match raw.as_whole_number() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(raw.mismatch(Self::KIND)),
            },
        }
    }
}

impl FromScalar for NaiveDateTime {
    const KIND: ScalarKind = ScalarKind::Timestamp;

    fn from_raw(raw: RawScalar) -> Result<Self, StorageError> {
        match &raw {
            RawScalar::Text(v) => parse_timestamp(v).map_err(|_| raw.mismatch(Self::KIND)),
            _ => Err(raw.mismatch(Self::KIND)),
        }
    }
}

impl FromScalar for String {
    const KIND: ScalarKind = ScalarKind::Text;

    fn from_raw(raw: RawScalar) -> Result<Self, StorageError> {
        Ok(match raw {
            RawScalar::Integer(v) => v.to_string(),
            RawScalar::Real(v) => v.to_string(),
            RawScalar::Text(v) => v,
        })
    }
}

/// Read a column as it was stored, `None` for NULL.
pub fn raw_column<I>(row: &SqliteRow, index: I) -> Result<Option<RawScalar>, StorageError>
where
    I: ColumnIndex<SqliteRow> + Copy,
{
    let value = row.try_get_raw(index)?;
    if value.is_null() {
        return Ok(None);
    }
    let type_name = value.type_info().name().to_string();

    let raw = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => RawScalar::Integer(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => RawScalar::Real(row.try_get_unchecked::<f64, _>(index)?),
        "TEXT" => RawScalar::Text(row.try_get_unchecked::<String, _>(index)?),
        other => {
            return Err(StorageError::TypeCoercion {
                expected: ScalarKind::Text,
                found: other.to_lowercase(),
            });
        }
    };
    Ok(Some(raw))
}

/// Decode a nullable column as `T`.
pub fn column_opt<T, I>(row: &SqliteRow, index: I) -> Result<Option<T>, StorageError>
where
    T: FromScalar,
    I: ColumnIndex<SqliteRow> + Copy,
{
    raw_column(row, index)?.map(T::from_raw).transpose()
}

/// Decode a column that must not be NULL as `T`.
pub fn column<T, I>(row: &SqliteRow, index: I) -> Result<T, StorageError>
where
    T: FromScalar,
    I: ColumnIndex<SqliteRow> + Copy,
{
    column_opt(row, index)?.ok_or(StorageError::TypeCoercion {
        expected: T::KIND,
        found: "null".to_string(),
    })
}

/// A statement parameter, bound positionally to `?`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Integer(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Integer(value.into())
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Integer(value.into())
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<NaiveDateTime> for SqlParam {
    fn from(value: NaiveDateTime) -> Self {
        SqlParam::Text(format_timestamp(value))
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlParam::Null, Into::into)
    }
}

/// Build a `Vec<SqlParam>` from heterogeneous values.
#[macro_export]
macro_rules! params {
    () => { Vec::<$crate::storage::SqlParam>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::storage::SqlParam::from($value)),+]
    };
}
