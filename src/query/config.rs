use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The `data_config` payload of a widget or report, as received.
///
/// Nothing here is trusted: field names, aggregations, filter values and the
/// limit are only meaningful after validation against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetQueryConfig {
    pub source: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<MeasureSpec>,
    /// Keyed by field name; kept sorted so parameter order is stable.
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub limit: Option<serde_json::Value>,
    #[serde(default)]
    pub visualization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureSpec {
    pub field: String,
    pub aggregation: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
}

impl WidgetQueryConfig {
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::single("$", format!("malformed config: {}", e)))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value)
            .map_err(|e| ValidationError::single("$", format!("malformed config: {}", e)))
    }
}

/// How the requesting widget renders the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visualization {
    #[default]
    Table,
    Bar,
    Line,
    Pie,
    Kpi,
}

impl fmt::Display for Visualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Visualization::Table => "table",
            Visualization::Bar => "bar",
            Visualization::Line => "line",
            Visualization::Pie => "pie",
            Visualization::Kpi => "kpi",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Visualization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Visualization::Table),
            "bar" => Ok(Visualization::Bar),
            "line" => Ok(Visualization::Line),
            "pie" => Ok(Visualization::Pie),
            "kpi" => Ok(Visualization::Kpi),
            other => Err(format!(
                "unsupported visualization '{}' (expected table, bar, line, pie or kpi)",
                other
            )),
        }
    }
}
