//! Raw store rows → [`ResultTable`].
//!
//! Dimension cells keep their semantic type; measure cells are normalized
//! per column descriptor (integer counts, currency rounded to cents).

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::catalog::DataType;
use crate::db::{CellValue, StructuredError};
use crate::error::ExecutionError;
use crate::query::{ColumnDescriptor, ColumnKind, CompiledPlan, Visualization};

/// A shaped cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text form used for labels and CSV cells; null is empty.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
    pub visualization: Visualization,
}

/// Label/series form consumed by bar, line and pie widgets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl ResultTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Labels from the first dimension, one series per measure. `None` when
    /// the result has no dimension.
    pub fn to_chart(&self) -> Option<ChartData> {
        let label_idx = self
            .columns
            .iter()
            .position(|c| c.kind == ColumnKind::Dimension)?;
        let labels = self
            .rows
            .iter()
            .map(|row| row[label_idx].display())
            .collect();
        let series = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Measure)
            .map(|(i, c)| Series {
                name: c.name.clone(),
                values: self.rows.iter().map(|row| row[i].as_f64()).collect(),
            })
            .collect();
        Some(ChartData { labels, series })
    }

    /// First measure of a dimensionless single-row result.
    pub fn kpi_value(&self) -> Option<&Value> {
        if self.rows.len() != 1 || self.columns.iter().any(|c| c.kind == ColumnKind::Dimension) {
            return None;
        }
        let idx = self
            .columns
            .iter()
            .position(|c| c.kind == ColumnKind::Measure)?;
        self.rows[0].get(idx)
    }
}

/// Rows serialize as objects keyed by column name, in column order.
impl Serialize for ResultTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Row<'a>(&'a [ColumnDescriptor], &'a [Value]);

        impl Serialize for Row<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (column, value) in self.0.iter().zip(self.1) {
                    map.serialize_entry(&column.name, value)?;
                }
                map.end()
            }
        }

        let rows: Vec<Row<'_>> = self
            .rows
            .iter()
            .map(|r| Row(&self.columns, r))
            .collect();
        let mut state = serializer.serialize_struct("ResultTable", 3)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &rows)?;
        state.serialize_field("visualization", &self.visualization)?;
        state.end()
    }
}

/// Shape raw rows according to the plan's column descriptors.
pub fn shape(plan: &CompiledPlan, raw: Vec<Vec<CellValue>>) -> Result<ResultTable, ExecutionError> {
    let width = plan.columns.len();
    let mut rows = Vec::with_capacity(raw.len());
    for raw_row in raw {
        if raw_row.len() != width {
            return Err(ExecutionError::StoreFault(StructuredError::from_string(format!(
                "store returned {} columns, plan expects {}",
                raw_row.len(),
                width
            ))));
        }
        rows.push(
            plan.columns
                .iter()
                .zip(raw_row)
                .map(|(column, cell)| normalize(column, cell))
                .collect(),
        );
    }
    Ok(ResultTable {
        columns: plan.columns.clone(),
        rows,
        visualization: plan.visualization,
    })
}

fn normalize(column: &ColumnDescriptor, cell: CellValue) -> Value {
    match (column.data_type, cell) {
        (_, CellValue::Null) => Value::Null,
        (DataType::Integer, CellValue::Int(i)) => Value::Integer(i),
        (DataType::Integer, CellValue::Float(f)) => Value::Integer(f.round() as i64),
        (DataType::Currency, cell) => match cell.as_f64() {
            Some(f) => Value::Number(round_cents(f)),
            None => Value::Text(cell.display()),
        },
        (DataType::Decimal, cell) => match cell.as_f64() {
            Some(f) => Value::Number(f),
            None => Value::Text(cell.display()),
        },
        (_, CellValue::Text(s)) => Value::Text(s),
        (_, CellValue::Int(i)) => Value::Integer(i),
        (_, CellValue::Float(f)) => Value::Number(f),
        (_, cell) => Value::Text(cell.display()),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
