use std::ffi::c_int;

use rusqlite::ffi;
use serde::Serialize;

use crate::error::CrunchError;

/// Values read out of a result row.
///
/// SQL is typed per value, so two rows of the same column can hold
/// different variants:
/// ```rust
/// use crunch::prelude::*;
///
/// let values = vec![RowValues::Int(1), RowValues::Text("one".into()), RowValues::Null];
/// assert_eq!(values[0].as_int(), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
    /// NULL value
    Null,
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let RowValues::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// The column type this value was read as.
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            RowValues::Int(_) => ColumnType::Integer,
            RowValues::Float(_) => ColumnType::Float,
            RowValues::Text(_) => ColumnType::Text,
            RowValues::Blob(_) => ColumnType::Blob,
            RowValues::Null => ColumnType::Null,
        }
    }
}

/// Runtime type of a single column value, as reported by the engine at step
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl ColumnType {
    /// Map an engine type tag.
    ///
    /// # Errors
    /// Returns `CrunchError::TypeError` for a tag outside the five known
    /// fundamental types.
    pub fn from_code(code: c_int) -> Result<Self, CrunchError> {
        match code {
            ffi::SQLITE_INTEGER => Ok(ColumnType::Integer),
            ffi::SQLITE_FLOAT => Ok(ColumnType::Float),
            ffi::SQLITE_TEXT => Ok(ColumnType::Text),
            ffi::SQLITE_BLOB => Ok(ColumnType::Blob),
            ffi::SQLITE_NULL => Ok(ColumnType::Null),
            other => Err(CrunchError::TypeError(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_type_tags_map_to_column_types() {
        let tags = [
            (ffi::SQLITE_INTEGER, ColumnType::Integer),
            (ffi::SQLITE_FLOAT, ColumnType::Float),
            (ffi::SQLITE_TEXT, ColumnType::Text),
            (ffi::SQLITE_BLOB, ColumnType::Blob),
            (ffi::SQLITE_NULL, ColumnType::Null),
        ];
        for (code, expected) in tags {
            assert_eq!(ColumnType::from_code(code).unwrap(), expected);
        }
    }

    #[test]
    fn unknown_type_tag_is_a_type_error() {
        for code in [0, -1, 6, 42] {
            let err = ColumnType::from_code(code).unwrap_err();
            assert!(matches!(err, CrunchError::TypeError(c) if c == code));
            assert_eq!(err.to_string(), format!("Unknown column type {code}"));
        }
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let values = vec![
            RowValues::Int(2),
            RowValues::Float(0.5),
            RowValues::Text("a".into()),
            RowValues::Blob(vec![1, 2]),
            RowValues::Null,
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[2,0.5,"a",[1,2],null]"#);
    }
}
