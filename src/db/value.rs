use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;

use crate::error::ExecutionError;

use super::error::StructuredError;

/// One raw cell as read from the store, before shaping.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Date(d) => d.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}

/// Decode every column of `row`. A value the driver cannot decode into the
/// expected Rust type is a store fault, never a silent NULL.
pub fn row_values(row: &Row) -> Result<Vec<CellValue>, ExecutionError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| extract_value(row, i, col.name(), col.type_()))
        .collect()
}

fn extract_value(
    row: &Row,
    idx: usize,
    name: &str,
    pg_type: &Type,
) -> Result<CellValue, ExecutionError> {
    let value = match *pg_type {
        Type::BOOL => decode::<bool>(row, idx, name)?.map(CellValue::Bool),
        Type::INT2 => decode::<i16>(row, idx, name)?.map(|v| CellValue::Int(v.into())),
        Type::INT4 => decode::<i32>(row, idx, name)?.map(|v| CellValue::Int(v.into())),
        Type::INT8 => decode::<i64>(row, idx, name)?.map(CellValue::Int),
        Type::FLOAT4 => decode::<f32>(row, idx, name)?.map(|v| CellValue::Float(v.into())),
        Type::FLOAT8 => decode::<f64>(row, idx, name)?.map(CellValue::Float),
        Type::DATE => decode::<NaiveDate>(row, idx, name)?.map(CellValue::Date),
        Type::TIMESTAMP => decode::<NaiveDateTime>(row, idx, name)?.map(CellValue::DateTime),
        // TEXT, VARCHAR, BPCHAR, NAME and anything else that decodes as a string
        _ => decode::<String>(row, idx, name)?.map(CellValue::Text),
    };
    Ok(value.unwrap_or(CellValue::Null))
}

fn decode_error(column: &str, pg_type: &Type, err: impl fmt::Display) -> ExecutionError {
    ExecutionError::StoreFault(StructuredError::from_string(format!(
        "cannot decode column '{}' of type {}: {}",
        column,
        pg_type.name(),
        err
    )))
}

fn decode<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    name: &str,
) -> Result<Option<T>, ExecutionError> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| decode_error(name, row.columns()[idx].type_(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Null.display(), "NULL");
        assert_eq!(CellValue::Bool(true).display(), "true");
        assert_eq!(CellValue::Int(42).display(), "42");
        assert_eq!(CellValue::Float(2.5).display(), "2.5");
        assert_eq!(CellValue::from("2024-01").display(), "2024-01");
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(CellValue::Date(date).display(), "2024-03-01");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(CellValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(CellValue::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(CellValue::Null.as_f64(), None);
        assert_eq!(CellValue::from("3").as_f64(), None);
    }

    #[test]
    fn test_decode_error_is_store_fault() {
        let err = decode_error("total", &Type::NUMERIC, "cannot convert between types");
        let ExecutionError::StoreFault(fault) = err else {
            panic!("expected a store fault");
        };
        assert_eq!(
            fault.message,
            "cannot decode column 'total' of type numeric: cannot convert between types"
        );
    }
}
