//! Query execution against a database file.
//!
//! Exactly one statement per call; trailing comments and semicolons are fine.
//! No read-only guard: whatever the statement does is committed immediately
//! (SQLite autocommit), including writes.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::{open_connection, DbError};

/// One SQLite value, as returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

pub type Row = Vec<Value>;

impl From<rusqlite::types::Value> for Value {
    fn from(v: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value as V;
        match v {
            V::Null => Value::Null,
            V::Integer(n) => Value::Integer(n),
            V::Real(f) => Value::Real(f),
            V::Text(s) => Value::Text(s),
            V::Blob(b) => Value::Blob(b),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => write!(f, "[BLOB {} bytes]", b.len()),
        }
    }
}

/// Execute `sql` against the database at `path` and fetch every row.
pub fn execute_sql_query(sql: &str, path: &Path) -> Result<Vec<Row>, DbError> {
    let sql = sql.trim();
    let conn = open_connection(path)?;
    let query_err = |source: rusqlite::Error| DbError::Query {
        sql: sql.to_string(),
        source,
    };

    let rows = {
        let mut batch = rusqlite::Batch::new(&conn, sql);
        let Some(mut stmt) = batch.next().map_err(query_err)? else {
            return Ok(Vec::new());
        };
        // A tail that fails to prepare is still a second statement.
        if !matches!(batch.next(), Ok(None)) {
            return Err(DbError::MultipleStatements {
                sql: sql.to_string(),
            });
        }
        let width = stmt.column_count();
        let mut cursor = stmt.query([]).map_err(query_err)?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().map_err(query_err)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let v = row.get::<_, rusqlite::types::Value>(i).map_err(query_err)?;
                values.push(Value::from(v));
            }
            rows.push(values);
        }
        rows
    };

    conn.close().map_err(|(_, source)| query_err(source))?;
    debug!(path = %path.display(), rows = rows.len(), "executed query");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn students_db(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("students.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT NOT NULL, gpa REAL, photo BLOB);
             INSERT INTO students (id, name, gpa, photo) VALUES (1, 'Ada', 3.9, x'00ff');
             INSERT INTO students (id, name, gpa, photo) VALUES (2, 'Brook', NULL, NULL);",
        )
        .unwrap();
        path
    }

    #[test]
    fn returns_rows_in_order_with_typed_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = students_db(dir.path());

        let rows = execute_sql_query("  SELECT * FROM students ORDER BY id \n", &path).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![
                    Value::Integer(1),
                    Value::Text("Ada".to_string()),
                    Value::Real(3.9),
                    Value::Blob(vec![0x00, 0xff]),
                ],
                vec![
                    Value::Integer(2),
                    Value::Text("Brook".to_string()),
                    Value::Null,
                    Value::Null,
                ],
            ]
        );
    }

    #[test]
    fn empty_result_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = students_db(dir.path());
        let rows = execute_sql_query("SELECT name FROM students WHERE id > 100", &path).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn unknown_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = students_db(dir.path());
        let err = execute_sql_query("SELECT age FROM students", &path).unwrap_err();
        match err {
            DbError::Query { sql, .. } => assert_eq!(sql, "SELECT age FROM students"),
            other => panic!("expected query error, got {other}"),
        }
    }

    #[test]
    fn writes_are_committed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = students_db(dir.path());

        let rows = execute_sql_query("DELETE FROM students WHERE id = 2", &path).unwrap();
        assert!(rows.is_empty());

        let rows = execute_sql_query("SELECT COUNT(*) FROM students", &path).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn multiple_statements_are_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = students_db(dir.path());

        let err = execute_sql_query("SELECT COUNT(*) FROM students; DELETE FROM students", &path)
            .unwrap_err();
        assert!(matches!(err, DbError::MultipleStatements { .. }), "{err}");

        let rows = execute_sql_query("SELECT COUNT(*) FROM students;  -- done\n", &path).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(2)]]);
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let row = vec![
            Value::Null,
            Value::Integer(7),
            Value::Text("x".to_string()),
        ];
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"[null,7,"x"]"#);
    }
}
