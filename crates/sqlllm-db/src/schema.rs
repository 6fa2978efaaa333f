//! Schema introspection: SQLite catalog -> `SchemaDescription` -> DDL text.
//!
//! Catalog order is preserved everywhere (tables, columns, foreign keys) so the
//! rendered prompt is identical across runs against the same database file.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use rusqlite::Connection;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use tracing::debug;

use crate::{open_connection, ColumnDef, DbError, ForeignKey, SchemaDescription, TableDef};

/// Schema label for a database file: its file name up to the first `.`.
pub fn schema_name_from_path(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file_name.split('.').next().unwrap_or_default().to_string()
}

/// Read the structure of the database at `path`.
pub fn extract_schema(path: &Path) -> Result<SchemaDescription, DbError> {
    let conn = open_connection(path)?;
    let introspect = |source: rusqlite::Error| DbError::Introspect {
        path: path.to_path_buf(),
        source,
    };

    let table_names = list_tables(&conn).map_err(introspect)?;
    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = table_columns(&conn, &name).map_err(introspect)?;
        let foreign_keys = table_foreign_keys(&conn, &name).map_err(introspect)?;
        tables.push(TableDef {
            name,
            columns,
            foreign_keys,
        });
    }

    let schema = SchemaDescription {
        name: schema_name_from_path(path),
        tables,
    };
    debug!(
        path = %path.display(),
        tables = schema.tables.len(),
        foreign_keys = schema.foreign_key_count(),
        "extracted schema"
    );
    Ok(schema)
}

/// Rendered DDL for the database at `path`, as embedded in prompts.
pub fn extract_schema_info(path: &Path) -> Result<String, DbError> {
    Ok(extract_schema(path)?.render())
}

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND substr(name, 1, 7) <> 'sqlite_'",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnDef>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
    )?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnDef {
                name: row.get(0)?,
                data_type: row.get(1)?,
                nullable: row.get::<_, i64>(2)? == 0,
                default: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? > 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn table_foreign_keys(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(
        "SELECT seq, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1)",
    )?;
    let raw = stmt
        .query_map([table], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut foreign_keys = Vec::with_capacity(raw.len());
    for (seq, to_table, column, to_column) in raw {
        // `REFERENCES t` without a column list points at t's primary key.
        let to_column = match to_column {
            Some(c) => c,
            None => primary_key_column(conn, &to_table, seq)?.unwrap_or_else(|| column.clone()),
        };
        foreign_keys.push(ForeignKey {
            column,
            to_table,
            to_column,
        });
    }
    Ok(foreign_keys)
}

fn primary_key_column(conn: &Connection, table: &str, seq: i64) -> rusqlite::Result<Option<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(usize::try_from(seq).ok().and_then(|i| names.into_iter().nth(i)))
}

// Words that open a table constraint inside a CREATE TABLE body.
const CONSTRAINT_WORDS: &[&str] = &[
    "CHECK", "CONSTRAINT", "FOREIGN", "FULLTEXT", "INDEX", "KEY", "PRIMARY", "SPATIAL", "UNIQUE",
];

/// Quote identifiers that would not survive a SQL parser as bare words.
pub(crate) fn quote_ident(name: &str) -> Cow<'_, str> {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !CONSTRAINT_WORDS
            .iter()
            .any(|w| w.eq_ignore_ascii_case(name));
    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Declared types pass through when a SQL parser reads them as one data type;
/// anything else (`UNSIGNED BIG INT`, `FLOAT(10,2)`) is quoted.
pub(crate) fn quote_type(ty: &str) -> Cow<'_, str> {
    let dialect = GenericDialect {};
    let whole_type = Parser::new(&dialect)
        .try_with_sql(ty)
        .and_then(|mut parser| {
            parser.parse_data_type()?;
            Ok(parser.peek_token().token == Token::EOF)
        })
        .unwrap_or(false);
    if whole_type {
        Cow::Borrowed(ty)
    } else {
        Cow::Owned(format!("\"{}\"", ty.replace('"', "\"\"")))
    }
}

impl SchemaDescription {
    /// Render as DDL: `CREATE SCHEMA`, one `CREATE TABLE` per table, then one
    /// `ALTER TABLE ... ADD CONSTRAINT` per foreign key.
    ///
    /// Default values are copied verbatim from the catalog, so the text is
    /// documentation for the model rather than DDL to run.
    pub fn render(&self) -> String {
        let mut out = format!("CREATE SCHEMA {};\n", quote_ident(&self.name));

        for table in &self.tables {
            out.push_str(&format!("CREATE TABLE {} (\n", quote_ident(&table.name)));
            let mut lines = Vec::with_capacity(table.columns.len() + table.foreign_keys.len());
            for col in &table.columns {
                let mut line = format!("    {}", quote_ident(&col.name));
                let data_type = col.data_type.trim();
                if !data_type.is_empty() {
                    line.push(' ');
                    line.push_str(&quote_type(data_type));
                }
                if col.primary_key {
                    line.push_str(" PRIMARY KEY");
                }
                if !col.nullable {
                    line.push_str(" NOT NULL");
                }
                if let Some(default) = &col.default {
                    line.push_str(" DEFAULT ");
                    line.push_str(default);
                }
                lines.push(line);
            }
            for fk in &table.foreign_keys {
                lines.push(format!(
                    "    FOREIGN KEY ({}) REFERENCES {}({})",
                    quote_ident(&fk.column),
                    quote_ident(&fk.to_table),
                    quote_ident(&fk.to_column)
                ));
            }
            out.push_str(&lines.join(",\n"));
            out.push_str("\n);\n");
        }

        for table in &self.tables {
            for fk in &table.foreign_keys {
                let constraint = format!("FK_{}_{}", table.name, fk.column);
                out.push_str(&format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({});\n",
                    quote_ident(&table.name),
                    quote_ident(&constraint),
                    quote_ident(&fk.column),
                    quote_ident(&fk.to_table),
                    quote_ident(&fk.to_column)
                ));
            }
        }

        out
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
