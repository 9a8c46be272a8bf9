//! SQL AST types for compiled aggregate queries.
//!
//! The query compiler builds these nodes from catalog-approved expressions
//! only; nothing here is ever produced from caller-supplied text. The AST is:
//! - Restricted to the single-statement aggregate SELECT shape the engine emits
//! - Comparable (`PartialEq`), so compiled plans can be checked for determinism
//! - Rendered to PostgreSQL text by `render.rs`

/// An aggregate SELECT with the clauses the compiler fills in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub projections: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u32>,
}

/// An expression in the SELECT projection list, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expression,
    pub alias: Option<String>,
}

/// Table reference in FROM / JOIN clauses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub name: String,
}

impl TableRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// JOIN clause representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// Core expression type. Recursive to support nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference: `table.column` or just `column`.
    Column { table: Option<String>, name: String },
    /// Reference to an output alias (quoted on render), used by ORDER BY.
    Alias(String),
    /// Literal value.
    Literal(Literal),
    /// Binary operation: `left op right`.
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    /// Scalar function call: `name(args)`.
    Function { name: String, args: Vec<Expression> },
    /// Aggregate function call.
    Aggregate {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// CAST(expr AS type).
    Cast {
        expr: Box<Expression>,
        data_type: String,
    },
    /// Wildcard `*` (used in COUNT(*)).
    Wildcard,
    /// Parameter placeholder: `$1`, `$2`, etc.
    Parameter(usize),
    /// Type-cast using `::` operator (PostgreSQL specific).
    TypeCast {
        expr: Box<Expression>,
        data_type: String,
    },
}

impl Expression {
    pub fn column(table: &str, name: &str) -> Self {
        Expression::Column {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// `$n::data_type`; every bound parameter carries an explicit type.
    pub fn typed_parameter(index: usize, data_type: &str) -> Self {
        Expression::TypeCast {
            expr: Box::new(Expression::Parameter(index)),
            data_type: data_type.to_string(),
        }
    }

    /// Fold a list of predicates into a single AND chain.
    pub fn conjunction(mut predicates: Vec<Expression>) -> Option<Expression> {
        if predicates.is_empty() {
            return None;
        }
        let first = predicates.remove(0);
        Some(
            predicates
                .into_iter()
                .fold(first, |acc, p| Expression::binary(acc, BinaryOperator::And, p)),
        )
    }
}

/// Literal values in SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    String(String),
    Integer(i64),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Lt,
    LtEq,
    GtEq,
    And,
}

/// ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub asc: bool,
    pub nulls_first: Option<bool>,
}
