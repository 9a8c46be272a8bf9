/// AST → SQL renderer.
///
/// Converts the aggregate-query AST into a PostgreSQL SQL string. Output
/// aliases are always double-quoted so catalog-independent names (measure
/// aliases) can never collide with keywords.
use super::types::*;

/// Render a SELECT AST into a PostgreSQL SQL string.
pub fn render(select: &SelectQuery) -> String {
    let mut parts = Vec::new();

    let items: Vec<String> = select.projections.iter().map(render_select_item).collect();
    parts.push(format!("SELECT {}", items.join(", ")));

    if let Some(ref from) = select.from {
        parts.push(format!("FROM {}", render_table_ref(from)));
    }

    for join in &select.joins {
        parts.push(render_join(join));
    }

    if let Some(ref filter) = select.filter {
        parts.push(format!("WHERE {}", render_expr(filter)));
    }

    if !select.group_by.is_empty() {
        let groups: Vec<String> = select.group_by.iter().map(render_expr).collect();
        parts.push(format!("GROUP BY {}", groups.join(", ")));
    }

    if !select.order_by.is_empty() {
        let orders: Vec<String> = select.order_by.iter().map(render_order_by).collect();
        parts.push(format!("ORDER BY {}", orders.join(", ")));
    }

    if let Some(limit) = select.limit {
        parts.push(format!("LIMIT {}", limit));
    }

    parts.join(" ")
}

/// Double-quote an identifier, doubling any embedded quote.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn render_select_item(item: &SelectItem) -> String {
    let expr_str = render_expr(&item.expr);
    match &item.alias {
        Some(a) => format!("{} AS {}", expr_str, quote_ident(a)),
        None => expr_str,
    }
}

fn render_table_ref(table: &TableRef) -> String {
    table.name.clone()
}

fn render_join(join: &Join) -> String {
    let type_str = match join.join_type {
        JoinType::Inner => "JOIN",
        JoinType::Left => "LEFT JOIN",
    };
    format!(
        "{} {} ON {}",
        type_str,
        render_table_ref(&join.table),
        render_expr(&join.on)
    )
}

fn render_expr(expr: &Expression) -> String {
    match expr {
        Expression::Column { table, name } => match table {
            Some(t) => format!("{}.{}", t, name),
            None => name.clone(),
        },
        Expression::Alias(name) => quote_ident(name),
        Expression::Literal(lit) => render_literal(lit),
        Expression::BinaryOp { left, op, right } => {
            let op_str = match op {
                BinaryOperator::Eq => "=",
                BinaryOperator::Lt => "<",
                BinaryOperator::LtEq => "<=",
                BinaryOperator::GtEq => ">=",
                BinaryOperator::And => "AND",
            };
            format!("{} {} {}", render_expr(left), op_str, render_expr(right))
        }
        Expression::Function { name, args } => {
            let args_str: Vec<String> = args.iter().map(render_expr).collect();
            format!("{}({})", name, args_str.join(", "))
        }
        Expression::Aggregate {
            name,
            args,
            distinct,
        } => {
            let distinct_str = if *distinct { "DISTINCT " } else { "" };
            let args_str: Vec<String> = args.iter().map(render_expr).collect();
            format!("{}({}{})", name, distinct_str, args_str.join(", "))
        }
        Expression::Cast { expr, data_type } => {
            format!("CAST({} AS {})", render_expr(expr), data_type)
        }
        Expression::Wildcard => "*".to_string(),
        Expression::Parameter(idx) => format!("${}", idx),
        Expression::TypeCast { expr, data_type } => {
            format!("{}::{}", render_expr(expr), data_type)
        }
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Integer(i) => i.to_string(),
    }
}

fn render_order_by(order: &OrderByExpr) -> String {
    let mut s = render_expr(&order.expr);
    s.push_str(if order.asc { " ASC" } else { " DESC" });
    match order.nulls_first {
        Some(true) => s.push_str(" NULLS FIRST"),
        Some(false) => s.push_str(" NULLS LAST"),
        None => {}
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn assert_parses(sql: &str) {
        let parsed = Parser::parse_sql(&PostgreSqlDialect {}, sql);
        assert!(parsed.is_ok(), "{} -> {:?}", sql, parsed.err());
    }

    fn orders_by_status() -> SelectQuery {
        SelectQuery {
            projections: vec![
                SelectItem {
                    expr: Expression::column("orders", "status"),
                    alias: Some("dim_0".into()),
                },
                SelectItem {
                    expr: Expression::Aggregate {
                        name: "COUNT".into(),
                        args: vec![Expression::Wildcard],
                        distinct: false,
                    },
                    alias: Some("orders".into()),
                },
            ],
            from: Some(TableRef::named("orders")),
            group_by: vec![Expression::column("orders", "status")],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_simple_aggregate() {
        let sql = render(&orders_by_status());
        assert_eq!(
            sql,
            "SELECT orders.status AS \"dim_0\", COUNT(*) AS \"orders\" FROM orders GROUP BY orders.status"
        );
        assert_parses(&sql);
    }

    #[test]
    fn test_render_join_filter_order_limit() {
        let mut q = orders_by_status();
        q.joins.push(Join {
            join_type: JoinType::Left,
            table: TableRef::named("customers"),
            on: Expression::binary(
                Expression::column("customers", "id"),
                BinaryOperator::Eq,
                Expression::column("orders", "customer_id"),
            ),
        });
        q.filter = Expression::conjunction(vec![
            Expression::binary(
                Expression::column("customers", "type"),
                BinaryOperator::Eq,
                Expression::typed_parameter(1, "text"),
            ),
            Expression::binary(
                Expression::column("orders", "total_amount"),
                BinaryOperator::GtEq,
                Expression::typed_parameter(2, "float8"),
            ),
        ]);
        q.order_by.push(OrderByExpr {
            expr: Expression::Alias("orders".into()),
            asc: false,
            nulls_first: Some(false),
        });
        q.limit = Some(25);

        let sql = render(&q);
        assert!(sql.contains("LEFT JOIN customers ON customers.id = orders.customer_id"));
        assert!(sql.contains("WHERE customers.type = $1::text AND orders.total_amount >= $2::float8"));
        assert!(sql.contains("ORDER BY \"orders\" DESC NULLS LAST"));
        assert!(sql.ends_with("LIMIT 25"));
        assert_parses(&sql);
    }

    #[test]
    fn test_render_distinct_aggregate_with_cast() {
        let expr = Expression::Cast {
            expr: Box::new(Expression::Aggregate {
                name: "SUM".into(),
                args: vec![Expression::column("orders", "total_amount")],
                distinct: false,
            }),
            data_type: "DOUBLE PRECISION".into(),
        };
        assert_eq!(
            render_expr(&expr),
            "CAST(SUM(orders.total_amount) AS DOUBLE PRECISION)"
        );

        let distinct = Expression::Aggregate {
            name: "COUNT".into(),
            args: vec![Expression::column("orders", "id")],
            distinct: true,
        };
        assert_eq!(render_expr(&distinct), "COUNT(DISTINCT orders.id)");
    }

    #[test]
    fn test_render_literal_escapes_quotes() {
        let lit = Expression::Literal(Literal::String("it's".into()));
        assert_eq!(render_expr(&lit), "'it''s'");
        assert_eq!(render_expr(&Expression::Literal(Literal::Integer(2))), "2");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("revenue"), "\"revenue\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_render_time_bucket_function() {
        let expr = Expression::Function {
            name: "to_char".into(),
            args: vec![
                Expression::Function {
                    name: "date_trunc".into(),
                    args: vec![
                        Expression::Literal(Literal::String("month".into())),
                        Expression::column("orders", "order_date"),
                    ],
                },
                Expression::Literal(Literal::String("YYYY-MM".into())),
            ],
        };
        assert_eq!(
            render_expr(&expr),
            "to_char(date_trunc('month', orders.order_date), 'YYYY-MM')"
        );
    }
}
