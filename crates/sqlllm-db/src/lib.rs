//! SQLite access for SQLLLM
//!
//! Everything the generation loop needs from a benchmark database:
//! - Schema introspection -> DDL text for the prompt (`extract_schema`)
//! - Query execution with per-call connections (`execute_sql_query`)
//! - Parsing rendered DDL back into the schema model (`parse_sql_ddl`)
//!
//! Connections are never pooled or shared: every call opens the database,
//! does its work and closes it again.

use std::path::{Path, PathBuf};

use serde::Serialize;

pub mod ddl;
pub mod exec;
pub mod schema;

pub use ddl::parse_sql_ddl;
pub use exec::{execute_sql_query, Row, Value};
pub use schema::{extract_schema, extract_schema_info, schema_name_from_path};

/// Structural description of one database, rendered into the prompt as DDL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDescription {
    pub name: String,
    pub tables: Vec<TableDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub to_table: String,
    pub to_column: String,
}

impl SchemaDescription {
    pub fn foreign_key_count(&self) -> usize {
        self.tables.iter().map(|t| t.foreign_keys.len()).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to read schema of {}: {source}", path.display())]
    Introspect {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("query failed: {source}")]
    Query {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("query failed: only one statement can be executed at a time")]
    MultipleStatements { sql: String },
    #[error("DDL parse error: {0}")]
    Ddl(#[from] sqlparser::parser::ParserError),
}

/// Handle to a single-file SQLite database.
///
/// Holding a handle does not hold a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteDatabase {
    path: PathBuf,
}

impl SqliteDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Benchmark layout: `<root>/<db_id>/<db_id>.sqlite`.
    pub fn resolve(root: &Path, db_id: &str) -> Self {
        Self::new(root.join(db_id).join(format!("{db_id}.sqlite")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> Result<SchemaDescription, DbError> {
        extract_schema(&self.path)
    }

    pub fn execute(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        execute_sql_query(sql, &self.path)
    }
}

pub(crate) fn open_connection(path: &Path) -> Result<rusqlite::Connection, DbError> {
    use rusqlite::OpenFlags;

    if !path.is_file() {
        return Err(DbError::NotFound(path.to_path_buf()));
    }
    rusqlite::Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|source| DbError::Open {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_benchmark_layout() {
        let db = SqliteDatabase::resolve(Path::new("data/dev_databases"), "california_schools");
        assert_eq!(
            db.path(),
            Path::new("data/dev_databases/california_schools/california_schools.sqlite")
        );
    }

    #[test]
    fn missing_database_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.sqlite");
        let err = SqliteDatabase::new(&path).schema().unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)), "got {err}");
        assert!(!path.exists());
    }
}
