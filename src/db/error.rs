use std::error::Error as StdError;
use std::fmt;

use crate::error::ExecutionError;

/// Categorized error types for store failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, type mismatch)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Insufficient resources (too many connections, out of memory)
    Resources,
    /// Operator intervention (query cancelled, server shutting down)
    Intervention,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Resources => write!(f, "Resource Error"),
            ErrorCategory::Intervention => write!(f, "Operator Intervention"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error with context from PostgreSQL error responses.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// SQLSTATE error code (e.g., "42601" for syntax_error)
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Table associated with the error
    pub table: Option<String>,
    /// Column associated with the error
    pub column: Option<String>,
    /// Computed line/column (1-based) of the error position in the query
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl StructuredError {
    /// Create a StructuredError from a tokio_postgres error, using the query text
    /// to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            StructuredError {
                category: categorize_sqlstate(&code),
                code,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                column: db_err.column().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.is_closed() || err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            StructuredError {
                category,
                code: String::new(),
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                ..Self::from_string(String::new())
            }
        }
    }

    /// Create a simple error from a plain string (for non-database errors).
    pub fn from_string(msg: String) -> Self {
        StructuredError {
            category: ErrorCategory::Unknown,
            code: String::new(),
            message: msg,
            detail: None,
            hint: None,
            table: None,
            column: None,
            line: None,
            col: None,
        }
    }

    /// Format as a multi-line string for logs and CLI output.
    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category, self.message)];

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => lines.push(format!("  Object: {}.{}", table, column)),
            (Some(table), None) => lines.push(format!("  Table: {}", table)),
            _ => {}
        }

        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (SQLSTATE {})", self.message, self.code)
        }
    }
}

/// Map a driver error onto the engine's execution taxonomy.
pub fn classify(err: &tokio_postgres::Error, query: &str) -> ExecutionError {
    let structured = StructuredError::from_pg_error(err, query);
    match structured.category {
        ErrorCategory::Connection | ErrorCategory::Resources => {
            ExecutionError::Unavailable(structured.to_string())
        }
        // 57014 = query_canceled
        ErrorCategory::Intervention if structured.code == "57014" => ExecutionError::Cancelled,
        ErrorCategory::Intervention => ExecutionError::Unavailable(structured.to_string()),
        _ => ExecutionError::StoreFault(structured),
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, 42883 = undefined_function
                ErrorCategory::Semantic
            }
        }
        // Class 22: Data Exception (division by zero, invalid datetime, etc.)
        "22" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        // Class 53: Insufficient Resources (53300 = too_many_connections)
        "53" => ErrorCategory::Resources,
        "54" | "55" => ErrorCategory::Execution,
        // Class 57: Operator Intervention (57014 = query_canceled)
        "57" => ErrorCategory::Intervention,
        _ => ErrorCategory::Unknown,
    }
}
