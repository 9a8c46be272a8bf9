//! Validated config → parameterized aggregate SELECT.
//!
//! Compilation is pure: the same validated query always yields the same plan.
//! Every identifier comes from the catalog and every caller value becomes a
//! typed bind parameter.

use chrono::NaiveTime;

use crate::ast::{
    BinaryOperator, Expression, Join, Literal, OrderByExpr, SelectItem, SelectQuery, TableRef,
};
use crate::catalog::{Aggregation, DataType, JoinPath, MeasureDef, SourceDescriptor};
use crate::error::CompileError;

use super::plan::{ColumnDescriptor, ColumnKind, CompiledPlan, ParamValue};
use super::validate::{FilterCondition, FilterTarget, ValidFilter, ValidMeasure, ValidatedQuery};

/// Aggregates other than `count` are cast so every driver sees a float8.
const MEASURE_SQL_TYPE: &str = "DOUBLE PRECISION";

/// Currency aggregates are rounded to this many places in NUMERIC first.
const CURRENCY_SCALE: i64 = 2;

pub fn compile(query: &ValidatedQuery<'_>) -> Result<CompiledPlan, CompileError> {
    if query.measures.is_empty() {
        return Err(CompileError::NoMeasures);
    }

    let source = query.source;
    let mut joins = JoinSet::new(source);
    let mut binder = Binder::default();
    let mut projections = Vec::new();
    let mut group_by = Vec::new();
    let mut columns = Vec::new();

    for (i, dim) in query.dimensions.iter().enumerate() {
        let expr = dim.resolver.expression();
        joins.require(dim.resolver.table());
        projections.push(SelectItem {
            expr: expr.clone(),
            alias: Some(dimension_slot(i)),
        });
        group_by.push(expr);
        columns.push(ColumnDescriptor {
            name: dimension_slot(i),
            field: dim.name.to_string(),
            kind: ColumnKind::Dimension,
            data_type: dim.data_type,
            aggregation: None,
        });
    }

    for measure in &query.measures {
        joins.require(measure.def.table);
        projections.push(SelectItem {
            expr: aggregate(measure),
            alias: Some(measure.alias.clone()),
        });
        columns.push(ColumnDescriptor {
            name: measure.alias.clone(),
            field: measure.def.name.to_string(),
            kind: ColumnKind::Measure,
            data_type: output_type(measure.def, measure.aggregation),
            aggregation: Some(measure.aggregation),
        });
    }

    let mut predicates = Vec::new();
    for filter in &query.filters {
        joins.require(filter.target.table());
        predicates.extend(compile_filter(filter, &mut binder)?);
    }

    let order_by = order_by(query, &columns)?;
    let tables = joins.tables();

    let select = SelectQuery {
        projections,
        from: Some(TableRef::named(source.base_table)),
        joins: joins
            .paths
            .iter()
            .map(|path| Join {
                join_type: path.join_type,
                table: TableRef::named(path.table),
                on: path.on(),
            })
            .collect(),
        filter: Expression::conjunction(predicates),
        group_by,
        order_by,
        limit: Some(query.limit),
    };

    Ok(CompiledPlan::new(
        source.name,
        select,
        binder.params,
        columns,
        tables,
        query.visualization,
    ))
}

fn dimension_slot(index: usize) -> String {
    format!("dim_{}", index)
}

fn aggregate(measure: &ValidMeasure<'_>) -> Expression {
    let arg = measure.def.expression();
    match measure.aggregation {
        Aggregation::Count => Expression::Aggregate {
            name: Aggregation::Count.sql_name().into(),
            distinct: measure.def.distinct && arg.is_some(),
            args: vec![arg.unwrap_or(Expression::Wildcard)],
        },
        agg => {
            let mut value = Expression::Aggregate {
                name: agg.sql_name().into(),
                args: vec![arg.unwrap_or(Expression::Wildcard)],
                distinct: false,
            };
            if output_type(measure.def, agg) == DataType::Currency {
                value = Expression::Function {
                    name: "ROUND".into(),
                    args: vec![
                        Expression::Cast {
                            expr: Box::new(value),
                            data_type: "NUMERIC".into(),
                        },
                        Expression::Literal(Literal::Integer(CURRENCY_SCALE)),
                    ],
                };
            }
            Expression::Cast {
                expr: Box::new(value),
                data_type: MEASURE_SQL_TYPE.into(),
            }
        }
    }
}

/// Semantic type of an aggregated measure column.
fn output_type(def: &MeasureDef, aggregation: Aggregation) -> DataType {
    match aggregation {
        Aggregation::Count => DataType::Integer,
        Aggregation::Avg if def.data_type == DataType::Currency => DataType::Currency,
        Aggregation::Avg => DataType::Decimal,
        Aggregation::Sum | Aggregation::Min | Aggregation::Max => def.data_type,
    }
}

/// Deduplicated joins, in the order they must appear in FROM.
struct JoinSet<'c> {
    source: &'c SourceDescriptor,
    paths: Vec<&'c JoinPath>,
}

impl<'c> JoinSet<'c> {
    fn new(source: &'c SourceDescriptor) -> Self {
        Self {
            source,
            paths: Vec::new(),
        }
    }

    /// Add every join on the path to `table`. Paths are base-first, so a
    /// parent is always inserted before its children.
    fn require(&mut self, table: &str) {
        for path in self.source.join_path(table) {
            if !self.paths.iter().any(|p| p.table == path.table) {
                self.paths.push(path);
            }
        }
    }

    fn tables(&self) -> Vec<&'static str> {
        std::iter::once(self.source.base_table)
            .chain(self.paths.iter().map(|p| p.table))
            .collect()
    }
}

/// Hands out `$n` placeholders in binding order.
#[derive(Default)]
struct Binder {
    params: Vec<ParamValue>,
}

impl Binder {
    fn bind(&mut self, value: ParamValue) -> Expression {
        let data_type = value.pg_type();
        self.params.push(value);
        Expression::typed_parameter(self.params.len(), data_type)
    }
}

fn compile_filter(
    filter: &ValidFilter<'_>,
    binder: &mut Binder,
) -> Result<Vec<Expression>, CompileError> {
    let column = match filter.target {
        FilterTarget::Dimension(def) => match filter.condition {
            FilterCondition::Period { .. } => def.resolver.bucket_column(),
            _ => Some(def.resolver.expression()),
        },
        FilterTarget::Measure(def) => def.expression(),
    }
    .ok_or_else(|| CompileError::UnfilterableField(filter.field.clone()))?;

    let compare = |op, value, binder: &mut Binder| {
        Expression::binary(column.clone(), op, binder.bind(value))
    };

    let predicates = match &filter.condition {
        FilterCondition::TextEquals(value) => {
            vec![compare(BinaryOperator::Eq, ParamValue::Text(value.clone()), binder)]
        }
        FilterCondition::TextIn(values) => vec![Expression::binary(
            column.clone(),
            BinaryOperator::Eq,
            Expression::Function {
                name: "ANY".into(),
                args: vec![binder.bind(ParamValue::TextList(values.clone()))],
            },
        )],
        FilterCondition::NumberEquals(value) => {
            vec![compare(BinaryOperator::Eq, ParamValue::Float(*value), binder)]
        }
        FilterCondition::NumberRange { min, max } => {
            let mut preds = Vec::new();
            if let Some(min) = min {
                preds.push(compare(BinaryOperator::GtEq, ParamValue::Float(*min), binder));
            }
            if let Some(max) = max {
                preds.push(compare(BinaryOperator::LtEq, ParamValue::Float(*max), binder));
            }
            preds
        }
        FilterCondition::Period { start, end } => {
            let mut preds = Vec::new();
            if let Some(start) = start {
                let ts = ParamValue::Timestamp(start.and_time(NaiveTime::MIN));
                preds.push(compare(BinaryOperator::GtEq, ts, binder));
            }
            if let Some(end) = end {
                let ts = ParamValue::Timestamp(end.and_time(NaiveTime::MIN));
                preds.push(compare(BinaryOperator::Lt, ts, binder));
            }
            preds
        }
    };
    Ok(predicates)
}

fn order_by(
    query: &ValidatedQuery<'_>,
    columns: &[ColumnDescriptor],
) -> Result<Vec<OrderByExpr>, CompileError> {
    let dims = query.dimensions.len();
    let ascending = |name: String| OrderByExpr {
        expr: Expression::Alias(name),
        asc: true,
        nulls_first: None,
    };

    let mut order = Vec::new();
    let primary = match &query.sort {
        Some(sort) => {
            if !columns.iter().any(|c| c.name == sort.field) {
                return Err(CompileError::UnknownSortAlias(sort.field.clone()));
            }
            Some((sort.field.clone(), sort.descending))
        }
        None if dims == 1 => Some((query.measures[0].alias.clone(), true)),
        None => None,
    };

    if let Some((field, descending)) = &primary {
        order.push(OrderByExpr {
            expr: Expression::Alias(field.clone()),
            asc: !descending,
            nulls_first: if *descending { Some(false) } else { None },
        });
    }

    // Dimension slots break ties so row order never depends on the planner.
    for slot in (0..dims).map(dimension_slot) {
        if primary.as_ref().map(|(f, _)| f) != Some(&slot) {
            order.push(ascending(slot));
        }
    }
    Ok(order)
}
