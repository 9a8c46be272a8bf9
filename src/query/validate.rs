//! Widget config validation.
//!
//! Turns an untrusted [`WidgetQueryConfig`] into a [`ValidatedQuery`] whose
//! every field points into the catalog. All problems are collected and
//! reported together.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde_json::Value;

use crate::catalog::{
    Aggregation, Catalog, DimensionDef, MeasureDef, SourceDescriptor, TimeBucket,
};
use crate::error::{FieldIssue, ValidationError};

use super::config::{Visualization, WidgetQueryConfig};

/// PostgreSQL truncates identifiers beyond this length.
const MAX_ALIAS_LEN: usize = 63;

#[derive(Debug, Clone)]
pub struct ValidatedQuery<'c> {
    pub source: &'c SourceDescriptor,
    pub dimensions: Vec<&'c DimensionDef>,
    pub measures: Vec<ValidMeasure<'c>>,
    pub filters: Vec<ValidFilter<'c>>,
    pub sort: Option<SortRequest>,
    /// Already clamped to the engine maximum.
    pub limit: u32,
    pub visualization: Visualization,
}

#[derive(Debug, Clone)]
pub struct ValidMeasure<'c> {
    pub def: &'c MeasureDef,
    pub aggregation: Aggregation,
    pub alias: String,
}

#[derive(Debug, Clone, Copy)]
pub enum FilterTarget<'c> {
    Dimension(&'c DimensionDef),
    Measure(&'c MeasureDef),
}

impl FilterTarget<'_> {
    pub fn table(&self) -> &'static str {
        match self {
            FilterTarget::Dimension(d) => d.resolver.table(),
            FilterTarget::Measure(m) => m.table,
        }
    }
}

/// A filter value after type-checking against its field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    TextEquals(String),
    TextIn(Vec<String>),
    NumberEquals(f64),
    NumberRange { min: Option<f64>, max: Option<f64> },
    /// Half-open calendar period `[start, end)` on a time bucket's column.
    Period {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone)]
pub struct ValidFilter<'c> {
    pub field: String,
    pub target: FilterTarget<'c>,
    pub condition: FilterCondition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRequest {
    pub field: String,
    pub descending: bool,
}

/// Collects issues while walking the config.
#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldIssue {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Validate `config` against `catalog`, clamping the limit to `max_limit`.
pub fn validate<'c>(
    catalog: &'c Catalog,
    config: &WidgetQueryConfig,
    max_limit: u32,
) -> Result<ValidatedQuery<'c>, ValidationError> {
    let mut issues = Issues::default();

    let source = match catalog.resolve(&config.source) {
        Ok(source) => Some(source),
        Err(e) => {
            issues.push("source", e.to_string());
            None
        }
    };

    if config.measures.is_empty() {
        issues.push("measures", "at least one measure is required");
    }

    let limit = validate_limit(config.limit.as_ref(), max_limit, &mut issues);
    let visualization = validate_visualization(config, &mut issues);
    let sort = validate_sort(config, &mut issues);

    let Some(source) = source else {
        return Err(ValidationError { issues: issues.0 });
    };

    let dimensions: Vec<&DimensionDef> = config
        .dimensions
        .iter()
        .enumerate()
        .filter_map(|(i, name)| match source.dimension(name) {
            Some(def) => Some(def),
            None => {
                issues.push(
                    format!("dimensions[{}]", i),
                    format!("unknown dimension '{}' for source '{}'", name, source.name),
                );
                None
            }
        })
        .collect();

    let measures = validate_measures(source, config, &mut issues);
    let filters = validate_filters(source, config, &mut issues);

    check_fan_out(source, &dimensions, &measures, &filters, &mut issues);

    if issues.0.is_empty() {
        Ok(ValidatedQuery {
            source,
            dimensions,
            measures: measures.into_iter().map(|(_, m)| m).collect(),
            filters,
            sort,
            limit,
            visualization,
        })
    } else {
        Err(ValidationError { issues: issues.0 })
    }
}

fn validate_limit(limit: Option<&Value>, max_limit: u32, issues: &mut Issues) -> u32 {
    match limit {
        None | Some(Value::Null) => max_limit,
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => n.min(max_limit as u64) as u32,
            _ => {
                issues.push("limit", format!("must be a positive integer, got {}", value));
                max_limit
            }
        },
    }
}

fn validate_visualization(config: &WidgetQueryConfig, issues: &mut Issues) -> Visualization {
    let visualization = match config.visualization.as_deref() {
        None => Visualization::default(),
        Some(name) => match name.parse() {
            Ok(v) => v,
            Err(message) => {
                issues.push("visualization", message);
                return Visualization::default();
            }
        },
    };

    let dims = config.dimensions.len();
    let measures = config.measures.len();
    match visualization {
        Visualization::Kpi if dims != 0 => {
            issues.push("visualization", "kpi widgets take no dimensions");
        }
        Visualization::Pie if dims != 1 || measures != 1 => {
            issues.push(
                "visualization",
                "pie widgets take exactly one dimension and one measure",
            );
        }
        Visualization::Bar | Visualization::Line if dims == 0 => {
            issues.push(
                "visualization",
                format!("{} charts need at least one dimension", visualization),
            );
        }
        _ => {}
    }
    visualization
}

fn validate_sort(config: &WidgetQueryConfig, issues: &mut Issues) -> Option<SortRequest> {
    let sort = config.sort.as_ref()?;
    if sort.field.trim().is_empty() {
        issues.push("sort.field", "must not be empty");
    }
    let descending = match sort.direction.as_deref().map(str::to_ascii_lowercase) {
        None => false,
        Some(d) if d == "asc" => false,
        Some(d) if d == "desc" => true,
        Some(other) => {
            issues.push(
                "sort.direction",
                format!("expected 'asc' or 'desc', got '{}'", other),
            );
            false
        }
    };
    Some(SortRequest {
        field: sort.field.clone(),
        descending,
    })
}

/// Returns each valid measure with its index in the config.
fn validate_measures<'c>(
    source: &'c SourceDescriptor,
    config: &WidgetQueryConfig,
    issues: &mut Issues,
) -> Vec<(usize, ValidMeasure<'c>)> {
    let mut seen_aliases = BTreeSet::new();
    let mut measures = Vec::new();

    for (i, spec) in config.measures.iter().enumerate() {
        let def = source.measure(&spec.field);
        if def.is_none() {
            issues.push(
                format!("measures[{}].field", i),
                format!(
                    "unknown measure '{}' for source '{}'",
                    spec.field, source.name
                ),
            );
        }

        let aggregation = match spec.aggregation.parse::<Aggregation>() {
            Ok(agg) => Some(agg),
            Err(message) => {
                issues.push(format!("measures[{}].aggregation", i), message);
                None
            }
        };

        if let (Some(def), Some(agg)) = (def, aggregation) {
            if !def.allows(agg) {
                let allowed: Vec<&str> = def
                    .allowed_aggregations()
                    .iter()
                    .map(|a| a.as_str())
                    .collect();
                issues.push(
                    format!("measures[{}].aggregation", i),
                    format!(
                        "'{}' is not allowed on '{}' (allowed: {})",
                        agg,
                        def.name,
                        allowed.join(", ")
                    ),
                );
            }
        }

        let alias = match &spec.alias {
            Some(alias) => alias.clone(),
            None => format!("{}_{}", spec.aggregation.to_ascii_lowercase(), spec.field),
        };
        let alias_field = format!("measures[{}].alias", i);
        if let Err(message) = check_alias(&alias) {
            issues.push(alias_field, message);
        } else if !seen_aliases.insert(alias.clone()) {
            issues.push(alias_field, format!("duplicate alias '{}'", alias));
        }

        if let (Some(def), Some(aggregation)) = (def, aggregation) {
            if def.allows(aggregation) {
                measures.push((
                    i,
                    ValidMeasure {
                        def,
                        aggregation,
                        alias,
                    },
                ));
            }
        }
    }
    measures
}

fn check_alias(alias: &str) -> Result<(), String> {
    let mut chars = alias.chars();
    let valid_start = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_lowercase());
    let valid_rest = chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit());
    if !valid_start || !valid_rest || alias.len() > MAX_ALIAS_LEN {
        return Err(format!(
            "'{}' is not a valid alias (lowercase letters, digits and '_', at most {} characters)",
            alias, MAX_ALIAS_LEN
        ));
    }
    if is_dimension_slot(alias) {
        return Err(format!(
            "'{}' is reserved for dimension columns",
            alias
        ));
    }
    Ok(())
}

/// `dim_0`, `dim_1`, ...
pub(crate) fn is_dimension_slot(name: &str) -> bool {
    name.strip_prefix("dim_")
        .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn validate_filters<'c>(
    source: &'c SourceDescriptor,
    config: &WidgetQueryConfig,
    issues: &mut Issues,
) -> Vec<ValidFilter<'c>> {
    let mut filters = Vec::new();

    for (name, value) in &config.filters {
        let path = format!("filters.{}", name);
        let (target, condition) = if let Some(def) = source.dimension(name) {
            let condition = match def.resolver.time_bucket() {
                Some(bucket) => parse_period(bucket, value),
                None if def.data_type.is_numeric() => parse_number(value),
                None => parse_text(def, value),
            };
            (FilterTarget::Dimension(def), condition)
        } else if let Some(def) = source.measure(name) {
            let condition = if def.is_filterable() {
                parse_number(value)
            } else {
                Err(format!("measure '{}' cannot be filtered", def.name))
            };
            (FilterTarget::Measure(def), condition)
        } else {
            issues.push(
                path,
                format!("unknown field '{}' for source '{}'", name, source.name),
            );
            continue;
        };

        match condition {
            Ok(condition) => filters.push(ValidFilter {
                field: name.clone(),
                target,
                condition,
            }),
            Err(message) => issues.push(path, message),
        }
    }
    filters
}

fn parse_text(def: &DimensionDef, value: &Value) -> Result<FilterCondition, String> {
    let check = |s: &str| -> Result<(), String> {
        match def.values {
            Some(values) if !values.contains(&s) => Err(format!(
                "'{}' is not a valid {} (expected one of: {})",
                s,
                def.name,
                values.join(", ")
            )),
            _ => Ok(()),
        }
    };

    match value {
        Value::String(s) => {
            check(s)?;
            Ok(FilterCondition::TextEquals(s.clone()))
        }
        Value::Array(items) if !items.is_empty() => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| format!("expected a list of strings, got {}", item))?;
                check(s)?;
                values.push(s.to_string());
            }
            Ok(FilterCondition::TextIn(values))
        }
        Value::Array(_) => Err("value list must not be empty".to_string()),
        other => Err(format!(
            "expected a string or a list of strings, got {}",
            other
        )),
    }
}

fn parse_number(value: &Value) -> Result<FilterCondition, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(FilterCondition::NumberEquals)
            .ok_or_else(|| format!("{} is not representable as a number", n)),
        Value::Object(range) => {
            reject_unknown_keys(range, &["min", "max"])?;
            let bound = |key: &str| -> Result<Option<f64>, String> {
                match range.get(key) {
                    None | Some(Value::Null) => Ok(None),
                    Some(v) => v
                        .as_f64()
                        .map(Some)
                        .ok_or_else(|| format!("'{}' must be a number, got {}", key, v)),
                }
            };
            let (min, max) = (bound("min")?, bound("max")?);
            match (min, max) {
                (None, None) => Err("range needs 'min' and/or 'max'".to_string()),
                (Some(lo), Some(hi)) if lo > hi => {
                    Err(format!("range min {} is greater than max {}", lo, hi))
                }
                _ => Ok(FilterCondition::NumberRange { min, max }),
            }
        }
        other => Err(format!(
            "expected a number or a {{\"min\", \"max\"}} range, got {}",
            other
        )),
    }
}

fn parse_period(bucket: TimeBucket, value: &Value) -> Result<FilterCondition, String> {
    let label = |v: &Value| -> Result<NaiveDate, String> {
        v.as_str()
            .and_then(|s| bucket.parse_label(s))
            .ok_or_else(|| {
                format!(
                    "expected a {} label like '{}', got {}",
                    bucket.trunc_unit(),
                    bucket.label_example(),
                    v
                )
            })
    };
    let end_of = |start: NaiveDate| {
        bucket
            .next_start(start)
            .ok_or_else(|| "period is out of range".to_string())
    };

    match value {
        Value::String(_) => {
            let start = label(value)?;
            Ok(FilterCondition::Period {
                start: Some(start),
                end: Some(end_of(start)?),
            })
        }
        Value::Object(range) => {
            reject_unknown_keys(range, &["from", "to"])?;
            let start = match range.get("from") {
                None | Some(Value::Null) => None,
                Some(v) => Some(label(v)?),
            };
            let last = match range.get("to") {
                None | Some(Value::Null) => None,
                Some(v) => Some(label(v)?),
            };
            if let (Some(s), Some(l)) = (start, last) {
                if s > l {
                    return Err("period 'from' is after 'to'".to_string());
                }
            }
            let end = match last {
                Some(l) => Some(end_of(l)?),
                None => None,
            };
            if start.is_none() && end.is_none() {
                return Err("period needs 'from' and/or 'to'".to_string());
            }
            Ok(FilterCondition::Period { start, end })
        }
        other => Err(format!(
            "expected a {} label or a {{\"from\", \"to\"}} range, got {}",
            bucket.trunc_unit(),
            other
        )),
    }
}

fn reject_unknown_keys(
    object: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<(), String> {
    match object.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(format!(
            "unexpected key '{}' (allowed: {})",
            key,
            allowed.join(", ")
        )),
        None => Ok(()),
    }
}

/// Reject duplicate-sensitive aggregates that a one-to-many join would inflate.
fn check_fan_out(
    source: &SourceDescriptor,
    dimensions: &[&DimensionDef],
    measures: &[(usize, ValidMeasure<'_>)],
    filters: &[ValidFilter<'_>],
    issues: &mut Issues,
) {
    let tables = dimensions
        .iter()
        .map(|d| d.resolver.table())
        .chain(measures.iter().map(|(_, m)| m.def.table))
        .chain(filters.iter().map(|f| f.target.table()));

    let mut fanning: Vec<&'static str> = Vec::new();
    for table in tables {
        for join in source.join_path(table) {
            if join.fans_out && !fanning.contains(&join.table) {
                fanning.push(join.table);
            }
        }
    }
    if fanning.is_empty() {
        return;
    }

    for (i, measure) in measures {
        let distinct_count = measure.aggregation == Aggregation::Count && measure.def.distinct;
        if !measure.aggregation.is_duplicate_sensitive() || distinct_count {
            continue;
        }
        let lineage = source.lineage(measure.def.table);
        if let Some(table) = fanning.iter().find(|t| !lineage.contains(t)) {
            issues.push(
                format!("measures[{}].aggregation", i),
                format!(
                    "{} of '{}' would be inflated by the one-to-many join to '{}'",
                    measure.aggregation, measure.def.name, table
                ),
            );
        }
    }
}
