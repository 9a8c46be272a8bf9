use crate::ast::JoinType;

use super::{
    Aggregation, DataType, DimensionDef, JoinPath, MeasureDef, Resolver, SourceDescriptor,
    TimeBucket,
};

const NUMERIC_AGGREGATIONS: &[Aggregation] = &[
    Aggregation::Sum,
    Aggregation::Avg,
    Aggregation::Min,
    Aggregation::Max,
];

const COUNT_ONLY: &[Aggregation] = &[];

const CUSTOMER_TYPES: &[&str] = &["corporate", "individual"];

const ORDER_STATUSES: &[&str] = &[
    "pending",
    "processing",
    "shipped",
    "delivered",
    "cancelled",
];

pub(super) fn builtin_sources() -> Vec<SourceDescriptor> {
    vec![orders(), customers(), products()]
}

fn attribute(name: &'static str, table: &'static str, column: &'static str) -> DimensionDef {
    DimensionDef {
        name,
        resolver: Resolver::Column { table, column },
        data_type: DataType::Text,
        values: None,
    }
}

fn enumerated(
    name: &'static str,
    table: &'static str,
    column: &'static str,
    values: &'static [&'static str],
) -> DimensionDef {
    DimensionDef {
        values: Some(values),
        ..attribute(name, table, column)
    }
}

/// `day`, `month`, `quarter` and `year` buckets over one timestamp column.
fn time_buckets(table: &'static str, column: &'static str) -> Vec<DimensionDef> {
    [
        ("day", TimeBucket::Day),
        ("month", TimeBucket::Month),
        ("quarter", TimeBucket::Quarter),
        ("year", TimeBucket::Year),
    ]
    .into_iter()
    .map(|(name, bucket)| DimensionDef {
        name,
        resolver: Resolver::TimeBucket {
            table,
            column,
            bucket,
        },
        data_type: DataType::BucketLabel,
        values: None,
    })
    .collect()
}

fn lookup(
    table: &'static str,
    column: &'static str,
    parent: &'static str,
    parent_column: &'static str,
) -> JoinPath {
    JoinPath {
        table,
        column,
        parent,
        parent_column,
        join_type: JoinType::Left,
        fans_out: false,
    }
}

fn orders() -> SourceDescriptor {
    let mut dimensions = vec![
        enumerated("status", "orders", "status", ORDER_STATUSES),
        attribute("customer", "customers", "name"),
        enumerated("customer_type", "customers", "type", CUSTOMER_TYPES),
        attribute("city", "customers", "city"),
        attribute("country", "customers", "country"),
        attribute("product", "products", "name"),
        attribute("category", "categories", "name"),
    ];
    dimensions.extend(time_buckets("orders", "order_date"));

    SourceDescriptor {
        name: "orders",
        base_table: "orders",
        joins: vec![
            lookup("customers", "id", "orders", "customer_id"),
            JoinPath {
                table: "order_items",
                column: "order_id",
                parent: "orders",
                parent_column: "id",
                join_type: JoinType::Inner,
                fans_out: true,
            },
            lookup("products", "id", "order_items", "product_id"),
            lookup("categories", "id", "products", "category_id"),
        ],
        dimensions,
        measures: vec![
            MeasureDef {
                name: "total_amount",
                table: "orders",
                column: Some("total_amount"),
                data_type: DataType::Currency,
                aggregations: NUMERIC_AGGREGATIONS,
                distinct: false,
            },
            MeasureDef {
                name: "order_count",
                table: "orders",
                column: Some("id"),
                data_type: DataType::Integer,
                aggregations: COUNT_ONLY,
                distinct: true,
            },
            MeasureDef {
                name: "quantity",
                table: "order_items",
                column: Some("quantity"),
                data_type: DataType::Integer,
                aggregations: NUMERIC_AGGREGATIONS,
                distinct: false,
            },
            MeasureDef {
                name: "line_total",
                table: "order_items",
                column: Some("subtotal"),
                data_type: DataType::Currency,
                aggregations: NUMERIC_AGGREGATIONS,
                distinct: false,
            },
        ],
    }
}

fn customers() -> SourceDescriptor {
    let mut dimensions = vec![
        enumerated("type", "customers", "type", CUSTOMER_TYPES),
        attribute("city", "customers", "city"),
        attribute("country", "customers", "country"),
    ];
    dimensions.extend(time_buckets("customers", "created_at"));

    SourceDescriptor {
        name: "customers",
        base_table: "customers",
        joins: vec![],
        dimensions,
        measures: vec![MeasureDef {
            name: "customer_count",
            table: "customers",
            column: Some("id"),
            data_type: DataType::Integer,
            aggregations: COUNT_ONLY,
            distinct: true,
        }],
    }
}

fn products() -> SourceDescriptor {
    SourceDescriptor {
        name: "products",
        base_table: "products",
        joins: vec![lookup("categories", "id", "products", "category_id")],
        dimensions: vec![
            attribute("product", "products", "name"),
            attribute("category", "categories", "name"),
        ],
        measures: vec![
            MeasureDef {
                name: "product_count",
                table: "products",
                column: Some("id"),
                data_type: DataType::Integer,
                aggregations: COUNT_ONLY,
                distinct: true,
            },
            MeasureDef {
                name: "price",
                table: "products",
                column: Some("price"),
                data_type: DataType::Currency,
                aggregations: NUMERIC_AGGREGATIONS,
                distinct: false,
            },
            MeasureDef {
                name: "stock_quantity",
                table: "products",
                column: Some("stock_quantity"),
                data_type: DataType::Integer,
                aggregations: NUMERIC_AGGREGATIONS,
                distinct: false,
            },
        ],
    }
}
