use crate::shape::ResultTable;

/// Header row of column names, then one line per row (RFC 4180 quoting).
/// Nulls are empty cells.
pub fn to_csv(table: &ResultTable) -> String {
    let mut output = String::new();

    let headers: Vec<String> = table.columns.iter().map(|c| csv_escape(&c.name)).collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    for row in &table.rows {
        let cells: Vec<String> = row.iter().map(|cell| csv_escape(&cell.display())).collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

/// The full table: column descriptors, rows as objects, visualization.
pub fn to_json(table: &ResultTable) -> String {
    serde_json::to_string_pretty(table).unwrap_or_else(|_| "{}".to_string())
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Aggregation, DataType};
    use crate::query::{ColumnDescriptor, ColumnKind, Visualization};
    use crate::shape::Value;

    fn make_table() -> ResultTable {
        ResultTable {
            columns: vec![
                ColumnDescriptor {
                    name: "dim_0".to_string(),
                    field: "city".to_string(),
                    kind: ColumnKind::Dimension,
                    data_type: DataType::Text,
                    aggregation: None,
                },
                ColumnDescriptor {
                    name: "revenue".to_string(),
                    field: "total_amount".to_string(),
                    kind: ColumnKind::Measure,
                    data_type: DataType::Currency,
                    aggregation: Some(Aggregation::Sum),
                },
            ],
            rows: vec![
                vec![Value::Text("Lyon".into()), Value::Number(120.5)],
                vec![Value::Text("Washington, D.C.".into()), Value::Null],
                vec![Value::Text("say \"hi\"".into()), Value::Number(3.0)],
            ],
            visualization: Visualization::Bar,
        }
    }

    #[test]
    fn test_csv_export() {
        let csv = to_csv(&make_table());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "dim_0,revenue");
        assert_eq!(lines[1], "Lyon,120.5");
    }

    #[test]
    fn test_csv_escaping() {
        let csv = to_csv(&make_table());
        assert!(csv.contains("\"Washington, D.C.\","));
        assert!(csv.contains("\"say \"\"hi\"\"\",3"));
    }

    #[test]
    fn test_json_export() {
        let json = to_json(&make_table());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["rows"][0]["dim_0"], "Lyon");
        assert_eq!(parsed["rows"][0]["revenue"], 120.5);
        assert!(parsed["rows"][1]["revenue"].is_null());
        assert_eq!(parsed["columns"][1]["aggregation"], "sum");
        assert_eq!(parsed["visualization"], "bar");
    }

    #[test]
    fn test_empty_table() {
        let mut table = make_table();
        table.rows.clear();
        assert_eq!(to_csv(&table), "dim_0,revenue\n");
    }
}
