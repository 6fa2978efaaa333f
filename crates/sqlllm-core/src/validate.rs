//! Schema-blind syntax check with a generic SQL grammar.
//!
//! Unknown tables and columns pass here and fail later at execution.

use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlSyntaxError {
    #[error("SQL parse error: {0}")]
    Parse(String),
    #[error("no SQL statement found")]
    Empty,
}

pub fn validate_sql(candidate: &str) -> Result<(), SqlSyntaxError> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, candidate)
        .map_err(|e| SqlSyntaxError::Parse(e.to_string()))?;
    if statements.is_empty() {
        return Err(SqlSyntaxError::Empty);
    }
    Ok(())
}

pub fn is_valid_sql(candidate: &str) -> bool {
    validate_sql(candidate).is_ok()
}
