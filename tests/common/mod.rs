//! In-memory `QueryStore` that evaluates compiled plans over fixture tables.
//!
//! Only the SELECT shape the compiler emits is supported: inner/left equi-joins,
//! AND-ed comparisons against bound parameters, `= ANY(...)`, the
//! `to_char(date_trunc(..))` bucket labels, grouped aggregates, ordering by
//! output alias and LIMIT.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};

use dashquery::ast::{BinaryOperator, Expression, JoinType, Literal};
use dashquery::db::{CellValue, QueryStore};
use dashquery::query::{CompiledPlan, ParamValue};
use dashquery::ExecutionError;

type Row = HashMap<String, CellValue>;

#[derive(Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Row>>,
    delay: Option<Duration>,
    failure: Option<ExecutionError>,
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: &str, columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values)
                    .map(|(c, v)| (format!("{}.{}", name, c), v))
                    .collect()
            })
            .collect();
        self.tables.insert(name.to_string(), rows);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_with(mut self, error: ExecutionError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn evaluate(&self, plan: &CompiledPlan) -> Vec<Vec<CellValue>> {
        let query = &plan.query;
        let params = &plan.params;
        let base = query.from.as_ref().expect("plan without FROM");
        let mut rows: Vec<Row> = self.tables.get(&base.name).cloned().unwrap_or_default();

        for join in &query.joins {
            let right = self.tables.get(&join.table.name).cloned().unwrap_or_default();
            let mut joined = Vec::new();
            for left in &rows {
                let mut matched = false;
                for r in &right {
                    let mut candidate = left.clone();
                    candidate.extend(r.clone());
                    if truthy(&eval(&join.on, &candidate, params)) {
                        joined.push(candidate);
                        matched = true;
                    }
                }
                if !matched && join.join_type == JoinType::Left {
                    joined.push(left.clone());
                }
            }
            rows = joined;
        }

        if let Some(filter) = &query.filter {
            rows.retain(|row| truthy(&eval(filter, row, params)));
        }

        // Group, keeping first-seen order.
        let mut groups: Vec<(Vec<String>, Vec<Row>)> = Vec::new();
        if query.group_by.is_empty() {
            groups.push((vec![], rows));
        } else {
            for row in rows {
                let key: Vec<String> = query
                    .group_by
                    .iter()
                    .map(|g| eval(g, &row, params).display())
                    .collect();
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
        }

        let mut output: Vec<Vec<CellValue>> = groups
            .iter()
            .map(|(_, members)| {
                query
                    .projections
                    .iter()
                    .map(|item| project(&item.expr, members, params))
                    .collect()
            })
            .collect();

        let aliases: Vec<&str> = query
            .projections
            .iter()
            .map(|p| p.alias.as_deref().unwrap_or(""))
            .collect();
        output.sort_by(|a, b| {
            for order in &query.order_by {
                let Expression::Alias(name) = &order.expr else {
                    continue;
                };
                let idx = aliases
                    .iter()
                    .position(|alias| *alias == name.as_str())
                    .expect("unknown alias");
                let (x, y) = (&a[idx], &b[idx]);
                let ord = match (x, y) {
                    (CellValue::Null, CellValue::Null) => Ordering::Equal,
                    // NULLS LAST unless asked otherwise
                    (CellValue::Null, _) => {
                        if order.nulls_first == Some(true) { Ordering::Less } else { Ordering::Greater }
                    }
                    (_, CellValue::Null) => {
                        if order.nulls_first == Some(true) { Ordering::Greater } else { Ordering::Less }
                    }
                    _ => {
                        let ord = compare(x, y).unwrap_or(Ordering::Equal);
                        if order.asc { ord } else { ord.reverse() }
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        if let Some(limit) = query.limit {
            output.truncate(limit as usize);
        }
        output
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn query(&self, plan: &CompiledPlan) -> Result<Vec<Vec<CellValue>>, ExecutionError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.executed.lock().unwrap().push(plan.sql.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(self.evaluate(plan))
    }
}

fn truthy(value: &CellValue) -> bool {
    matches!(value, CellValue::Bool(true))
}

fn param(params: &[ParamValue], index: usize) -> CellValue {
    match &params[index - 1] {
        ParamValue::Text(s) => CellValue::Text(s.clone()),
        ParamValue::Float(f) => CellValue::Float(*f),
        ParamValue::Timestamp(ts) => CellValue::DateTime(*ts),
        ParamValue::TextList(_) => panic!("text[] parameter outside ANY()"),
    }
}

fn as_datetime(value: &CellValue) -> Option<NaiveDateTime> {
    match value {
        CellValue::DateTime(dt) => Some(*dt),
        CellValue::Date(d) => d.and_hms_opt(0, 0, 0),
        _ => None,
    }
}

fn compare(a: &CellValue, b: &CellValue) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (as_datetime(a), as_datetime(b)) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (CellValue::Text(x), CellValue::Text(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn eval(expr: &Expression, row: &Row, params: &[ParamValue]) -> CellValue {
    match expr {
        Expression::Column { table, name } => {
            let key = format!("{}.{}", table.as_deref().unwrap_or(""), name);
            row.get(&key).cloned().unwrap_or(CellValue::Null)
        }
        Expression::Literal(Literal::String(s)) => CellValue::Text(s.clone()),
        Expression::Literal(Literal::Integer(i)) => CellValue::Int(*i),
        Expression::TypeCast { expr, .. } => match expr.as_ref() {
            Expression::Parameter(n) => param(params, *n),
            other => eval(other, row, params),
        },
        Expression::Parameter(n) => param(params, *n),
        Expression::BinaryOp { left, op, right } => {
            if *op == BinaryOperator::And {
                let both = truthy(&eval(left, row, params)) && truthy(&eval(right, row, params));
                return CellValue::Bool(both);
            }
            let lhs = eval(left, row, params);
            if let Expression::Function { name, args } = right.as_ref() {
                if name == "ANY" {
                    let Expression::TypeCast { expr, .. } = &args[0] else {
                        panic!("ANY without typed parameter");
                    };
                    let Expression::Parameter(n) = expr.as_ref() else {
                        panic!("ANY without parameter");
                    };
                    let ParamValue::TextList(values) = &params[n - 1] else {
                        panic!("ANY over non-list parameter");
                    };
                    return CellValue::Bool(match &lhs {
                        CellValue::Text(s) => values.contains(s),
                        _ => false,
                    });
                }
            }
            let rhs = eval(right, row, params);
            let Some(ord) = compare(&lhs, &rhs) else {
                return CellValue::Bool(false);
            };
            CellValue::Bool(match op {
                BinaryOperator::Eq => ord == Ordering::Equal,
                BinaryOperator::Lt => ord == Ordering::Less,
                BinaryOperator::LtEq => ord != Ordering::Greater,
                BinaryOperator::GtEq => ord != Ordering::Less,
                BinaryOperator::And => unreachable!(),
            })
        }
        Expression::Function { name, args } if name == "to_char" => {
            let Expression::Function { args: trunc, .. } = &args[0] else {
                panic!("to_char without date_trunc");
            };
            let Expression::Literal(Literal::String(unit)) = &trunc[0] else {
                panic!("date_trunc without unit");
            };
            match as_datetime(&eval(&trunc[1], row, params)) {
                Some(ts) => CellValue::Text(bucket_label(unit, ts.date())),
                None => CellValue::Null,
            }
        }
        other => panic!("unsupported row expression {:?}", other),
    }
}

fn bucket_label(unit: &str, date: NaiveDate) -> String {
    match unit {
        "day" => date.format("%Y-%m-%d").to_string(),
        "month" => date.format("%Y-%m").to_string(),
        "quarter" => format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1),
        "year" => date.format("%Y").to_string(),
        other => panic!("unsupported bucket {}", other),
    }
}

fn project(expr: &Expression, members: &[Row], params: &[ParamValue]) -> CellValue {
    match expr {
        Expression::Cast { expr, .. } => match project(expr, members, params) {
            CellValue::Int(i) => CellValue::Float(i as f64),
            other => other,
        },
        Expression::Aggregate {
            name,
            args,
            distinct,
        } => aggregate(name, &args[0], *distinct, members, params),
        Expression::Function { name, args } if name == "ROUND" => {
            let Expression::Literal(Literal::Integer(places)) = &args[1] else {
                panic!("ROUND without a scale: {:?}", args);
            };
            let scale = 10f64.powi(*places as i32);
            match project(&args[0], members, params).as_f64() {
                Some(f) => CellValue::Float((f * scale).round() / scale),
                None => CellValue::Null,
            }
        }
        other => members
            .first()
            .map(|row| eval(other, row, params))
            .unwrap_or(CellValue::Null),
    }
}

fn aggregate(
    name: &str,
    arg: &Expression,
    distinct: bool,
    members: &[Row],
    params: &[ParamValue],
) -> CellValue {
    if *arg == Expression::Wildcard {
        return CellValue::Int(members.len() as i64);
    }
    let mut values: Vec<CellValue> = members
        .iter()
        .map(|row| eval(arg, row, params))
        .filter(|v| *v != CellValue::Null)
        .collect();
    if distinct {
        let mut seen = Vec::new();
        values.retain(|v| {
            let key = v.display();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
    }
    let numbers: Vec<f64> = values.iter().filter_map(CellValue::as_f64).collect();
    match name {
        "COUNT" => CellValue::Int(values.len() as i64),
        _ if numbers.is_empty() => CellValue::Null,
        "SUM" => CellValue::Float(numbers.iter().sum()),
        "AVG" => CellValue::Float(numbers.iter().sum::<f64>() / numbers.len() as f64),
        "MIN" => CellValue::Float(numbers.iter().cloned().fold(f64::INFINITY, f64::min)),
        "MAX" => CellValue::Float(numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
        other => panic!("unsupported aggregate {}", other),
    }
}

pub fn ts(y: i32, m: u32, d: u32) -> CellValue {
    CellValue::DateTime(
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap(),
    )
}

pub fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

pub fn int(i: i64) -> CellValue {
    CellValue::Int(i)
}

pub fn num(f: f64) -> CellValue {
    CellValue::Float(f)
}

/// Customers, categories, products, orders and order items of a small shop.
pub fn shop() -> MemoryStore {
    MemoryStore::new()
        .table(
            "customers",
            &["id", "name", "email", "type", "city", "country", "created_at"],
            vec![
                vec![int(1), text("Acme"), text("ops@acme.test"), text("corporate"), text("Lyon"), text("FR"), ts(2023, 11, 2)],
                vec![int(2), text("Globex"), text("it@globex.test"), text("corporate"), text("Berlin"), text("DE"), ts(2024, 1, 15)],
                vec![int(3), text("Initech"), text("hi@initech.test"), text("corporate"), text("Lyon"), text("FR"), ts(2024, 1, 20)],
                vec![int(4), text("Ada"), text("ada@mail.test"), text("individual"), text("Paris"), text("FR"), ts(2024, 2, 3)],
                vec![int(5), text("Linus"), text("linus@mail.test"), text("individual"), text("Berlin"), text("DE"), ts(2024, 3, 9)],
            ],
        )
        .table(
            "categories",
            &["id", "name"],
            vec![vec![int(1), text("Books")], vec![int(2), text("Games")]],
        )
        .table(
            "products",
            &["id", "name", "category_id", "price", "stock_quantity"],
            vec![
                vec![int(1), text("Novel"), int(1), num(20.0), int(40)],
                vec![int(2), text("Atlas"), int(1), num(35.5), int(5)],
                vec![int(3), text("Chess"), int(2), num(60.0), int(12)],
            ],
        )
        .table(
            "orders",
            &["id", "customer_id", "order_date", "status", "total_amount"],
            vec![
                vec![int(1), int(1), ts(2024, 1, 5), text("delivered"), num(100.0)],
                vec![int(2), int(2), ts(2024, 1, 20), text("delivered"), num(200.0)],
                vec![int(3), int(4), ts(2024, 2, 11), text("shipped"), num(50.0)],
                vec![int(4), int(3), ts(2024, 4, 2), text("pending"), num(80.0)],
            ],
        )
        .table(
            "order_items",
            &["id", "order_id", "product_id", "quantity", "unit_price", "subtotal"],
            vec![
                vec![int(1), int(1), int(1), int(2), num(20.0), num(40.0)],
                vec![int(2), int(1), int(3), int(1), num(60.0), num(60.0)],
                vec![int(3), int(2), int(2), int(4), num(35.5), num(142.0)],
                vec![int(4), int(2), int(1), int(2), num(20.0), num(40.0)],
                vec![int(5), int(3), int(1), int(1), num(20.0), num(20.0)],
                vec![int(6), int(4), int(3), int(1), num(60.0), num(60.0)],
            ],
        )
}
