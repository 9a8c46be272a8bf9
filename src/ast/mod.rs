/// SQL AST and renderer for compiled aggregate queries.
///
/// ```text
/// Validated widget config
///       ↓
/// Query compiler          (query/compiler.rs)
///       ↓
/// SQL AST                 (types.rs)
///       ↓
/// SQL renderer            (render.rs)
///       ↓
/// Query executor          (db/ module)
/// ```
pub mod render;
pub mod types;

pub use render::{quote_ident, render};
pub use types::*;
