use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::DbError;

/// Type tag of a [`Value`].
///
/// The tag order is significant: mixed-type comparisons fall back to it,
/// and schema files spell column types with the lowercase tag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Int,
    LongInt,
    Str,
    Decimal,
    DateTime,
    Float,
    Blob,
}

impl ValueType {
    /// Lowercase tag name as used in schema files.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Int => "integer",
            ValueType::LongInt => "longint",
            ValueType::Str => "string",
            ValueType::Decimal => "decimal",
            ValueType::DateTime => "datetime",
            ValueType::Float => "float",
            ValueType::Blob => "blob",
        }
    }

    /// Case-insensitive reverse of [`ValueType::name`].
    pub fn from_name(name: &str) -> Option<ValueType> {
        match name.to_ascii_lowercase().as_str() {
            "integer" => Some(ValueType::Int),
            "longint" => Some(ValueType::LongInt),
            "string" => Some(ValueType::Str),
            "decimal" => Some(ValueType::Decimal),
            "datetime" => Some(ValueType::DateTime),
            "float" => Some(ValueType::Float),
            "blob" => Some(ValueType::Blob),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ValueType::Null => 0,
            ValueType::Int => 1,
            ValueType::LongInt => 2,
            ValueType::Str => 3,
            ValueType::Decimal => 4,
            ValueType::DateTime => 5,
            ValueType::Float => 6,
            ValueType::Blob => 7,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Database value variant.
///
/// A custom enum instead of `serde_json::Value` so that comparisons are
/// type-aware, SQL literals render without intermediate JSON, and keys can
/// hash into the identity map. Decimals are kept as strings to preserve
/// exact precision.
///
/// Equality and ordering are strict over the tag, matching `Hash`, so keys
/// built through `fix_type` compare reliably; [`Value::cmp_promoted`]
/// additionally promotes across the numeric tags for magnitude sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i32),
    LongInt(i64),
    Str(String),
    Decimal(String),
    DateTime(NaiveDateTime),
    Float(f64),
    Blob(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Int(_) => ValueType::Int,
            Value::LongInt(_) => ValueType::LongInt,
            Value::Str(_) => ValueType::Str,
            Value::Decimal(_) => ValueType::Decimal,
            Value::DateTime(_) => ValueType::DateTime,
            Value::Float(_) => ValueType::Float,
            Value::Blob(_) => ValueType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Result<i32, DbError> {
        match self {
            Value::Null => Err(DbError::NullValue),
            Value::Int(x) => Ok(*x),
            Value::LongInt(x) => i32::try_from(*x)
                .map_err(|_| DbError::BadCast(ValueType::LongInt, ValueType::Int)),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| DbError::BadCast(ValueType::Str, ValueType::Int)),
            other => Err(DbError::BadCast(other.value_type(), ValueType::Int)),
        }
    }

    pub fn as_longint(&self) -> Result<i64, DbError> {
        match self {
            Value::Null => Err(DbError::NullValue),
            Value::Int(x) => Ok(i64::from(*x)),
            Value::LongInt(x) => Ok(*x),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| DbError::BadCast(ValueType::Str, ValueType::LongInt)),
            other => Err(DbError::BadCast(other.value_type(), ValueType::LongInt)),
        }
    }

    pub fn as_float(&self) -> Result<f64, DbError> {
        match self {
            Value::Null => Err(DbError::NullValue),
            Value::Int(x) => Ok(f64::from(*x)),
            Value::LongInt(x) => Ok(*x as f64),
            Value::Float(x) => Ok(*x),
            Value::Decimal(s) | Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| DbError::BadCast(self.value_type(), ValueType::Float)),
            other => Err(DbError::BadCast(other.value_type(), ValueType::Float)),
        }
    }

    pub fn as_date_time(&self) -> Result<NaiveDateTime, DbError> {
        match self {
            Value::Null => Err(DbError::NullValue),
            Value::DateTime(dt) => Ok(*dt),
            Value::Str(s) => parse_date_time(s)
                .ok_or(DbError::BadCast(ValueType::Str, ValueType::DateTime)),
            other => Err(DbError::BadCast(other.value_type(), ValueType::DateTime)),
        }
    }

    /// Any non-null value has a string form.
    pub fn as_string(&self) -> Result<String, DbError> {
        match self {
            Value::Null => Err(DbError::NullValue),
            Value::Int(x) => Ok(x.to_string()),
            Value::LongInt(x) => Ok(x.to_string()),
            Value::Str(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::DateTime(dt) => Ok(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Value::Float(x) => Ok(x.to_string()),
            Value::Blob(b) => Ok(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], DbError> {
        match self {
            Value::Null => Err(DbError::NullValue),
            Value::Blob(b) => Ok(b),
            other => Err(DbError::BadCast(other.value_type(), ValueType::Blob)),
        }
    }

    /// Lossy coercion to the given tag. Null stays null regardless of the
    /// target; anything else converts through the natural parse/format path.
    pub fn fix_type(&self, target: ValueType) -> Result<Value, DbError> {
        if self.is_null() || self.value_type() == target {
            return Ok(self.clone());
        }
        match target {
            ValueType::Null => Ok(Value::Null),
            ValueType::Int => Ok(Value::Int(self.as_int()?)),
            ValueType::LongInt => Ok(Value::LongInt(self.as_longint()?)),
            ValueType::Str => Ok(Value::Str(self.as_string()?)),
            ValueType::Decimal => {
                let s = self.as_string()?;
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| DbError::BadCast(self.value_type(), ValueType::Decimal))?;
                Ok(Value::Decimal(s.trim().to_string()))
            }
            ValueType::DateTime => Ok(Value::DateTime(self.as_date_time()?)),
            ValueType::Float => Ok(Value::Float(self.as_float()?)),
            ValueType::Blob => match self {
                Value::Blob(b) => Ok(Value::Blob(b.clone())),
                Value::Str(s) => Ok(Value::Blob(s.clone().into_bytes())),
                other => Err(DbError::BadCast(other.value_type(), ValueType::Blob)),
            },
        }
    }

    /// Generic SQL literal rendering. Dialects may override details via
    /// `SqlDialect::sql_value`.
    pub fn sql_str(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Int(x) => x.to_string(),
            Value::LongInt(x) => x.to_string(),
            Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Decimal(s) => s.clone(),
            Value::DateTime(dt) => {
                if dt.nanosecond() != 0 {
                    format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f"))
                } else {
                    format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S"))
                }
            }
            Value::Float(x) => x.to_string(),
            Value::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                format!("X'{}'", hex)
            }
        }
    }

    fn numeric_pair(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::LongInt(b)) => Some(i64::from(*a).cmp(b)),
            (Value::LongInt(a), Value::Int(b)) => Some(a.cmp(&i64::from(*b))),
            (Value::Int(a), Value::Float(b)) => Some(f64::from(*a).total_cmp(b)),
            (Value::Float(a), Value::Int(b)) => Some(a.total_cmp(&f64::from(*b))),
            (Value::LongInt(a), Value::Float(b)) => Some((*a as f64).total_cmp(b)),
            (Value::Float(a), Value::LongInt(b)) => Some(a.total_cmp(&(*b as f64))),
            _ => None,
        }
    }

    /// Total order that promotes across the numeric tags, so a column
    /// mixing Int/LongInt/Float sorts by magnitude. Kept apart from `Ord`,
    /// which stays consistent with `Eq` and `Hash`.
    pub fn cmp_promoted(&self, other: &Value) -> Ordering {
        match self.numeric_pair(other) {
            Some(ord) => ord,
            None => self.cmp(other),
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DDTHH:MM:SS`, optionally with
/// a fractional part.
pub fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    None
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;

        match (self, other) {
            // Null sorts below any non-null value.
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,

            (Int(a), Int(b)) => a.cmp(b),
            (LongInt(a), LongInt(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Blob(a), Blob(b)) => a.cmp(b),

            // Mixed tags order by tag rank, consistent with equality.
            _ => self.value_type().rank().cmp(&other.value_type().rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().rank().hash(state);
        match self {
            Value::Null => {}
            Value::Int(x) => i64::from(*x).hash(state),
            Value::LongInt(x) => x.hash(state),
            Value::Str(s) | Value::Decimal(s) => s.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Blob(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            other => f.write_str(&other.as_string().unwrap_or_default()),
        }
    }
}

impl From<i32> for Value {
    fn from(x: i32) -> Self {
        Value::Int(x)
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::LongInt(x)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(x: Option<T>) -> Self {
        match x {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
