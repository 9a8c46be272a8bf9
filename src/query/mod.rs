//! Widget config → compiled plan.
//!
//! ```text
//! WidgetQueryConfig ──validate──▶ ValidatedQuery ──compile──▶ CompiledPlan
//!   (untrusted JSON)              (catalog refs)              (SQL + params)
//! ```

pub mod compiler;
pub mod config;
pub mod plan;
pub mod validate;

pub use compiler::compile;
pub use config::{MeasureSpec, SortSpec, Visualization, WidgetQueryConfig};
pub use plan::{ColumnDescriptor, ColumnKind, CompiledPlan, ParamValue};
pub use validate::{validate, ValidatedQuery};
