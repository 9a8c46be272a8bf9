//! Schema catalog: the static registry of queryable sources.
//!
//! Every expression the compiler emits originates here. A source lists its
//! base table, the join paths that reach related tables, and the whitelisted
//! dimensions and measures. Derived dimensions (`month`, `category`, ...) are
//! named resolvers, so adding one only touches the registry.

mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::ast::{BinaryOperator, Expression, JoinType, Literal};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    #[error("unknown dimension '{name}' for source '{source_name}'")]
    UnknownDimension { source_name: String, name: String },
    #[error("unknown measure '{name}' for source '{source_name}'")]
    UnknownMeasure { source_name: String, name: String },
}

/// Semantic type of a field, as exposed in result column descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Integer,
    Decimal,
    /// Fixed-point money amount with two fractional digits.
    Currency,
    /// Time-bucket label such as `2024-01`.
    BucketLabel,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Decimal | DataType::Currency
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl Aggregation {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Count => "COUNT",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    /// Whether repeated input rows (join fan-out) change the result.
    pub fn is_duplicate_sensitive(&self) -> bool {
        matches!(
            self,
            Aggregation::Sum | Aggregation::Avg | Aggregation::Count
        )
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "avg" => Ok(Aggregation::Avg),
            "count" => Ok(Aggregation::Count),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            other => Err(format!(
                "unsupported aggregation '{}' (expected sum, avg, count, min or max)",
                other
            )),
        }
    }
}

/// Calendar granularity of a time-bucket dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeBucket {
    Day,
    Month,
    Quarter,
    Year,
}

impl TimeBucket {
    /// Unit passed to `date_trunc`.
    pub fn trunc_unit(&self) -> &'static str {
        match self {
            TimeBucket::Day => "day",
            TimeBucket::Month => "month",
            TimeBucket::Quarter => "quarter",
            TimeBucket::Year => "year",
        }
    }

    /// `to_char` pattern producing the bucket label.
    pub fn label_pattern(&self) -> &'static str {
        match self {
            TimeBucket::Day => "YYYY-MM-DD",
            TimeBucket::Month => "YYYY-MM",
            TimeBucket::Quarter => "YYYY-\"Q\"Q",
            TimeBucket::Year => "YYYY",
        }
    }

    pub fn label_example(&self) -> &'static str {
        match self {
            TimeBucket::Day => "2024-01-31",
            TimeBucket::Month => "2024-01",
            TimeBucket::Quarter => "2024-Q1",
            TimeBucket::Year => "2024",
        }
    }

    /// Parse a bucket label into the first day of the bucket.
    pub fn parse_label(&self, label: &str) -> Option<NaiveDate> {
        match self {
            TimeBucket::Day => NaiveDate::parse_from_str(label, "%Y-%m-%d").ok(),
            TimeBucket::Month => {
                if label.len() != 7 {
                    return None;
                }
                NaiveDate::parse_from_str(&format!("{}-01", label), "%Y-%m-%d").ok()
            }
            TimeBucket::Quarter => {
                let (year, quarter) = label.split_once("-Q")?;
                if year.len() != 4 {
                    return None;
                }
                let year: i32 = year.parse().ok()?;
                let quarter: u32 = quarter.parse().ok()?;
                if !(1..=4).contains(&quarter) {
                    return None;
                }
                NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
            }
            TimeBucket::Year => {
                if label.len() != 4 {
                    return None;
                }
                let year: i32 = label.parse().ok()?;
                NaiveDate::from_ymd_opt(year, 1, 1)
            }
        }
    }

    /// First day of the bucket following the one starting at `start`.
    pub fn next_start(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            TimeBucket::Day => start.succ_opt(),
            TimeBucket::Month => start.checked_add_months(Months::new(1)),
            TimeBucket::Quarter => start.checked_add_months(Months::new(3)),
            TimeBucket::Year => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1),
        }
    }
}

/// How a dimension name turns into a SQL expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolver {
    Column {
        table: &'static str,
        column: &'static str,
    },
    /// Date-truncation of a timestamp column, labelled with `to_char`.
    TimeBucket {
        table: &'static str,
        column: &'static str,
        bucket: TimeBucket,
    },
}

impl Resolver {
    pub fn table(&self) -> &'static str {
        match self {
            Resolver::Column { table, .. } | Resolver::TimeBucket { table, .. } => table,
        }
    }

    pub fn expression(&self) -> Expression {
        match *self {
            Resolver::Column { table, column } => Expression::column(table, column),
            Resolver::TimeBucket {
                table,
                column,
                bucket,
            } => Expression::Function {
                name: "to_char".into(),
                args: vec![
                    Expression::Function {
                        name: "date_trunc".into(),
                        args: vec![
                            Expression::Literal(Literal::String(bucket.trunc_unit().into())),
                            Expression::column(table, column),
                        ],
                    },
                    Expression::Literal(Literal::String(bucket.label_pattern().into())),
                ],
            },
        }
    }

    pub fn time_bucket(&self) -> Option<TimeBucket> {
        match self {
            Resolver::TimeBucket { bucket, .. } => Some(*bucket),
            Resolver::Column { .. } => None,
        }
    }

    /// The raw timestamp column behind a time bucket, used for range filters.
    pub fn bucket_column(&self) -> Option<Expression> {
        match *self {
            Resolver::TimeBucket { table, column, .. } => Some(Expression::column(table, column)),
            Resolver::Column { .. } => None,
        }
    }
}

/// A join from an already-reachable `parent` table to `table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPath {
    pub table: &'static str,
    pub column: &'static str,
    pub parent: &'static str,
    pub parent_column: &'static str,
    pub join_type: JoinType,
    /// One parent row may match many rows of `table`.
    pub fans_out: bool,
}

impl JoinPath {
    pub fn on(&self) -> Expression {
        Expression::binary(
            Expression::column(self.table, self.column),
            BinaryOperator::Eq,
            Expression::column(self.parent, self.parent_column),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionDef {
    pub name: &'static str,
    pub resolver: Resolver,
    pub data_type: DataType,
    /// Closed value set for categorical dimensions.
    pub values: Option<&'static [&'static str]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureDef {
    pub name: &'static str,
    pub table: &'static str,
    /// `None` counts rows.
    pub column: Option<&'static str>,
    pub data_type: DataType,
    /// Aggregations besides `count`, which is always allowed.
    pub aggregations: &'static [Aggregation],
    /// `count` counts distinct values of `column`.
    pub distinct: bool,
}

impl MeasureDef {
    pub fn allows(&self, aggregation: Aggregation) -> bool {
        aggregation == Aggregation::Count || self.aggregations.contains(&aggregation)
    }

    pub fn allowed_aggregations(&self) -> Vec<Aggregation> {
        let mut allowed = vec![Aggregation::Count];
        allowed.extend(
            self.aggregations
                .iter()
                .copied()
                .filter(|a| *a != Aggregation::Count),
        );
        allowed
    }

    /// Row-level expression the aggregate is applied to.
    pub fn expression(&self) -> Option<Expression> {
        self.column.map(|c| Expression::column(self.table, c))
    }

    /// Whether filters may constrain the raw value before aggregation.
    pub fn is_filterable(&self) -> bool {
        self.column.is_some() && !self.distinct && self.data_type.is_numeric()
    }
}

#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub name: &'static str,
    pub base_table: &'static str,
    pub joins: Vec<JoinPath>,
    pub dimensions: Vec<DimensionDef>,
    pub measures: Vec<MeasureDef>,
}

impl SourceDescriptor {
    pub fn dimension(&self, name: &str) -> Option<&DimensionDef> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureDef> {
        self.measures.iter().find(|m| m.name == name)
    }

    /// Joins needed to reach `table` from the base table, base-first.
    pub fn join_path(&self, table: &str) -> Vec<&JoinPath> {
        let mut path = Vec::new();
        let mut current = table;
        while current != self.base_table {
            match self.joins.iter().find(|j| j.table == current) {
                Some(join) => {
                    path.push(join);
                    current = join.parent;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Tables on the path from the base table to `table`, inclusive.
    pub fn lineage(&self, table: &str) -> Vec<&'static str> {
        let mut tables = vec![self.base_table];
        tables.extend(self.join_path(table).iter().map(|j| j.table));
        tables
    }
}

/// A dimension resolved against its source.
#[derive(Debug, Clone)]
pub struct ResolvedDimension<'c> {
    pub def: &'c DimensionDef,
    pub expression: Expression,
    pub joins: Vec<&'c JoinPath>,
}

/// A measure resolved against its source.
#[derive(Debug, Clone)]
pub struct ResolvedMeasure<'c> {
    pub def: &'c MeasureDef,
    pub expression: Option<Expression>,
    pub allowed_aggregations: Vec<Aggregation>,
    pub joins: Vec<&'c JoinPath>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    sources: BTreeMap<&'static str, SourceDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dashboard schema: orders, customers and products.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for source in registry::builtin_sources() {
            catalog.register(source);
        }
        catalog
    }

    pub fn register(&mut self, source: SourceDescriptor) {
        self.sources.insert(source.name, source);
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.values()
    }

    pub fn resolve(&self, source: &str) -> Result<&SourceDescriptor, CatalogError> {
        self.sources
            .get(source)
            .ok_or_else(|| CatalogError::UnknownSource(source.to_string()))
    }

    pub fn resolve_dimension(
        &self,
        source: &str,
        name: &str,
    ) -> Result<ResolvedDimension<'_>, CatalogError> {
        let descriptor = self.resolve(source)?;
        let def = descriptor
            .dimension(name)
            .ok_or_else(|| CatalogError::UnknownDimension {
                source_name: source.to_string(),
                name: name.to_string(),
            })?;
        Ok(ResolvedDimension {
            def,
            expression: def.resolver.expression(),
            joins: descriptor.join_path(def.resolver.table()),
        })
    }

    pub fn resolve_measure(
        &self,
        source: &str,
        name: &str,
    ) -> Result<ResolvedMeasure<'_>, CatalogError> {
        let descriptor = self.resolve(source)?;
        let def = descriptor
            .measure(name)
            .ok_or_else(|| CatalogError::UnknownMeasure {
                source_name: source.to_string(),
                name: name.to_string(),
            })?;
        Ok(ResolvedMeasure {
            def,
            expression: def.expression(),
            allowed_aggregations: def.allowed_aggregations(),
            joins: descriptor.join_path(def.table),
        })
    }
}
