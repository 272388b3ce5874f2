use crate::error::{GeoflowError, Result};

/// Host-side classification of a declared SQL column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Geometry,
    /// Undeclared or unrecognized type (computed query columns).
    Any,
}

#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// Columns of a named table, with the primary key singled out.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedColumns {
    pub(crate) primary_key: Option<String>,
    pub(crate) specs: Vec<ColumnSpec>,
}

/// Owned dynamic value mirroring SQLite's storage classes.
///
/// Used both for table cell values and for process inputs/outputs.
/// `bool` converts through `Integer` 0/1; SQLite has no boolean
/// storage class.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Storage-class tag of a [`Value`], used for process input constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Integer(_) => ValueKind::Integer,
            Self::Real(_) => ValueKind::Real,
            Self::Text(_) => ValueKind::Text,
            Self::Blob(_) => ValueKind::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = GeoflowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(value) => Ok(value),
            other => Err(GeoflowError::ValueTypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = GeoflowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Real(value) => Ok(value),
            Value::Integer(value) => Ok(value as f64),
            other => Err(GeoflowError::ValueTypeMismatch {
                expected: "real",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = GeoflowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Text(value) => Ok(value),
            other => Err(GeoflowError::ValueTypeMismatch {
                expected: "text",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = GeoflowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            Value::Integer(_) => Err(GeoflowError::ValueOutOfRange { target: "bool" }),
            other => Err(GeoflowError::ValueTypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = GeoflowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Blob(value) => Ok(value),
            other => Err(GeoflowError::ValueTypeMismatch {
                expected: "blob",
                actual: other.type_name(),
            }),
        }
    }
}

// NULL-tolerant conversions: NULL becomes None, anything else goes
// through the non-optional conversion. Spelled out per type; a blanket
// impl over T would overlap with the standard library's reflexive
// TryFrom through `From<T> for Option<T>`.
macro_rules! optional_try_from {
    ($($target:ty),+ $(,)?) => {
        $(
            impl TryFrom<Value> for Option<$target> {
                type Error = GeoflowError;

                fn try_from(value: Value) -> Result<Self> {
                    match value {
                        Value::Null => Ok(None),
                        other => Ok(Some(<$target>::try_from(other)?)),
                    }
                }
            }
        )+
    };
}

optional_try_from!(i64, f64, String, bool, Vec<u8>);

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        match value {
            rusqlite::types::ValueRef::Null => Self::Null,
            rusqlite::types::ValueRef::Integer(value) => Self::Integer(value),
            rusqlite::types::ValueRef::Real(value) => Self::Real(value),
            rusqlite::types::ValueRef::Text(value) => {
                Self::Text(String::from_utf8_lossy(value).into_owned())
            }
            rusqlite::types::ValueRef::Blob(value) => Self::Blob(value.to_vec()),
        }
    }
}

impl rusqlite::types::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};

        let value_ref = match self {
            Self::Null => ValueRef::Null,
            Self::Integer(value) => ValueRef::Integer(*value),
            Self::Real(value) => ValueRef::Real(*value),
            Self::Text(value) => ValueRef::Text(value.as_bytes()),
            Self::Blob(value) => ValueRef::Blob(value.as_slice()),
        };
        Ok(ToSqlOutput::Borrowed(value_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, ValueKind};

    #[test]
    fn bool_roundtrips_through_integer() {
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(false), Value::Integer(0));

        let yes: bool = Value::Integer(1).try_into().expect("true");
        let no: bool = Value::Integer(0).try_into().expect("false");
        assert!(yes);
        assert!(!no);
    }

    #[test]
    fn out_of_range_bool_is_rejected() {
        let err = bool::try_from(Value::Integer(3)).expect_err("3 is not a bool");
        assert!(matches!(
            err,
            crate::GeoflowError::ValueOutOfRange { target: "bool" }
        ));
    }

    #[test]
    fn option_conversion_maps_null_to_none() {
        let none: Option<i64> = Value::Null.try_into().expect("null");
        assert_eq!(none, None);

        let some: Option<i64> = Value::Integer(5).try_into().expect("integer");
        assert_eq!(some, Some(5));
    }

    #[test]
    fn integer_widens_to_real() {
        let value: f64 = Value::Integer(2).try_into().expect("integer");
        assert_eq!(value, 2.0);
    }

    #[test]
    fn mismatch_reports_both_sides() {
        let err = String::try_from(Value::Integer(1)).expect_err("not text");
        match err {
            crate::GeoflowError::ValueTypeMismatch { expected, actual } => {
                assert_eq!(expected, "text");
                assert_eq!(actual, "integer");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::Text("a".to_string()).kind(), ValueKind::Text);
        assert_eq!(Value::Blob(vec![0]).kind(), ValueKind::Blob);
    }
}
