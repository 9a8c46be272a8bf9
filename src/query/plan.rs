use chrono::NaiveDateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_postgres::types::ToSql;

use crate::ast::{render, SelectQuery};
use crate::catalog::{Aggregation, DataType};

use super::config::Visualization;

/// A bound query parameter. The placeholder carries the matching cast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Float(f64),
    Timestamp(NaiveDateTime),
    TextList(Vec<String>),
}

impl ParamValue {
    /// PostgreSQL type named in the `$n::type` cast.
    pub fn pg_type(&self) -> &'static str {
        match self {
            ParamValue::Text(_) => "text",
            ParamValue::Float(_) => "float8",
            ParamValue::Timestamp(_) => "timestamp",
            ParamValue::TextList(_) => "text[]",
        }
    }

    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            ParamValue::Text(v) => v,
            ParamValue::Float(v) => v,
            ParamValue::Timestamp(v) => v,
            ParamValue::TextList(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Dimension,
    Measure,
}

/// Describes one output column, in select-list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    /// Output name: `dim_<n>` or the measure alias.
    pub name: String,
    /// Catalog field the column was computed from.
    pub field: String,
    pub kind: ColumnKind,
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
}

/// The result of compiling a validated config: one parameterized statement
/// plus everything needed to execute it and shape its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub source: &'static str,
    pub query: SelectQuery,
    pub sql: String,
    pub params: Vec<ParamValue>,
    pub columns: Vec<ColumnDescriptor>,
    /// Base table followed by every joined table.
    pub tables: Vec<&'static str>,
    pub visualization: Visualization,
    pub limit: u32,
}

impl CompiledPlan {
    pub fn new(
        source: &'static str,
        query: SelectQuery,
        params: Vec<ParamValue>,
        columns: Vec<ColumnDescriptor>,
        tables: Vec<&'static str>,
        visualization: Visualization,
    ) -> Self {
        let sql = render(&query);
        let limit = query.limit.unwrap_or(0);
        Self {
            source,
            query,
            sql,
            params,
            columns,
            tables,
            visualization,
            limit,
        }
    }

    pub fn reads_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| *t == table)
    }

    /// Hex SHA-256 over the source, rendered SQL and typed parameters.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.sql.as_bytes());
        for param in &self.params {
            hasher.update([0u8]);
            hasher.update(param.pg_type().as_bytes());
            hasher.update(b":");
            let encoded = serde_json::to_vec(param).unwrap_or_default();
            hasher.update(&encoded);
        }
        format!("{:x}", hasher.finalize())
    }
}
