//! Parse DDL text back into a `SchemaDescription`.
//!
//! Understands the statements `SchemaDescription::render` emits:
//! - `CREATE SCHEMA` -> schema name
//! - `CREATE TABLE` -> tables, columns, inline and table-level foreign keys
//! - `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` -> foreign keys
//!
//! Other statements are ignored.

use sqlparser::ast::*;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::{ColumnDef, DbError, ForeignKey, SchemaDescription, TableDef};

/// Parse SQL DDL and extract schema
pub fn parse_sql_ddl(sql: &str) -> Result<SchemaDescription, DbError> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;

    let mut schema = SchemaDescription::default();

    for stmt in statements {
        match stmt {
            Statement::CreateSchema { schema_name, .. } => {
                schema.name = match schema_name {
                    SchemaName::Simple(name) => object_name_last(&name),
                    other => other.to_string(),
                };
            }
            Statement::CreateTable {
                name,
                columns: sql_columns,
                constraints: sql_constraints,
                ..
            } => {
                let mut columns = Vec::with_capacity(sql_columns.len());
                let mut foreign_keys = Vec::new();

                for col in &sql_columns {
                    let mut column = ColumnDef {
                        name: col.name.value.clone(),
                        data_type: data_type_name(&col.data_type),
                        nullable: true,
                        default: None,
                        primary_key: false,
                    };
                    for opt in &col.options {
                        match &opt.option {
                            ColumnOption::NotNull => column.nullable = false,
                            ColumnOption::Default(expr) => column.default = Some(expr.to_string()),
                            ColumnOption::Unique { is_primary, .. } if *is_primary => {
                                column.primary_key = true
                            }
                            ColumnOption::ForeignKey {
                                foreign_table,
                                referred_columns,
                                ..
                            } => {
                                if let Some(to_column) = referred_columns.first() {
                                    foreign_keys.push(ForeignKey {
                                        column: column.name.clone(),
                                        to_table: object_name_last(foreign_table),
                                        to_column: to_column.value.clone(),
                                    });
                                }
                            }
                            _ => {}
                        }
                    }
                    columns.push(column);
                }

                for constraint in &sql_constraints {
                    foreign_keys.extend(foreign_keys_of(constraint));
                }

                schema.tables.push(TableDef {
                    name: object_name_last(&name),
                    columns,
                    foreign_keys,
                });
            }
            Statement::AlterTable {
                name, operations, ..
            } => {
                let table_name = object_name_last(&name);
                let Some(table) = schema.tables.iter_mut().find(|t| t.name == table_name) else {
                    continue;
                };
                for op in &operations {
                    if let AlterTableOperation::AddConstraint(constraint) = op {
                        for fk in foreign_keys_of(constraint) {
                            if !table.foreign_keys.contains(&fk) {
                                table.foreign_keys.push(fk);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(schema)
}

fn foreign_keys_of(constraint: &TableConstraint) -> Vec<ForeignKey> {
    match constraint {
        TableConstraint::ForeignKey {
            columns: fk_cols,
            foreign_table,
            referred_columns,
            ..
        } => fk_cols
            .iter()
            .zip(referred_columns.iter())
            .map(|(from, to)| ForeignKey {
                column: from.value.clone(),
                to_table: object_name_last(foreign_table),
                to_column: to.value.clone(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

// A quoted type name comes back as a custom type; keep its text unquoted.
fn data_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Custom(ObjectName(parts), modifiers) if modifiers.is_empty() => match &parts[..] {
            [ident] if ident.quote_style.is_some() => ident.value.clone(),
            _ => data_type.to_string(),
        },
        other => other.to_string(),
    }
}

fn object_name_last(name: &ObjectName) -> String {
    name.0.last().map(|ident| ident.value.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alter_table_foreign_keys_are_not_duplicated() {
        let sql = "
            CREATE SCHEMA shop;
            CREATE TABLE customer (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER,
                FOREIGN KEY (customer_id) REFERENCES customer(id)
            );
            ALTER TABLE orders ADD CONSTRAINT FK_orders_customer_id FOREIGN KEY (customer_id) REFERENCES customer(id);
        ";
        let schema = parse_sql_ddl(sql).unwrap();
        assert_eq!(schema.name, "shop");
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.tables[1].foreign_keys.len(), 1);
        assert!(!schema.tables[0].columns[1].nullable);
    }

    #[test]
    fn alter_table_adds_foreign_keys_missing_from_the_body() {
        let sql = "
            CREATE TABLE a (id INTEGER);
            CREATE TABLE b (a_id INTEGER);
            ALTER TABLE b ADD CONSTRAINT FK_b_a_id FOREIGN KEY (a_id) REFERENCES a(id);
        ";
        let schema = parse_sql_ddl(sql).unwrap();
        assert_eq!(
            schema.tables[1].foreign_keys,
            vec![ForeignKey {
                column: "a_id".to_string(),
                to_table: "a".to_string(),
                to_column: "id".to_string(),
            }]
        );
    }

    #[test]
    fn truncated_table_body_is_a_parse_error() {
        let err = parse_sql_ddl("CREATE TABLE t (\n    id INTEGER\n").unwrap_err();
        assert!(matches!(err, DbError::Ddl(_)));
    }
}
