//! Property tests for schema rendering
//!
//! Whatever tables a database holds, the rendered DDL must:
//! 1. parse with a generic SQL grammar
//! 2. keep table order, column order, declared types and foreign keys intact

use proptest::prelude::*;
use rusqlite::Connection;
use sqlllm_db::{extract_schema, parse_sql_ddl};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
struct TableSpec {
    name: String,
    columns: Vec<(String, &'static str)>,
    references_previous: bool,
}

// ============================================================================
// Strategies
// ============================================================================

fn column_type_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("INTEGER"),
        Just("TEXT"),
        Just("REAL"),
        Just("BLOB"),
        Just("NUMERIC"),
        Just("VARCHAR(20)"),
        Just("UNSIGNED BIG INT"),
        Just("VARYING CHARACTER(255)"),
        Just("NATIVE CHARACTER(70)"),
        Just("FLOAT(10,2)"),
    ]
}

/// Column names, including ones that need quoting (spaces, keywords).
fn column_names_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(
        prop_oneof![
            "[a-z][a-z0-9_]{0,7}",
            "[a-z]{1,5} [a-z]{1,5}",
            Just("key".to_string()),
            Just("order".to_string()),
        ],
        1..5,
    )
}

fn table_strategy() -> impl Strategy<Value = TableSpec> {
    (
        "[a-z]{1,8}",
        column_names_strategy(),
        prop::collection::vec(column_type_strategy(), 5),
        any::<bool>(),
    )
        .prop_map(|(name, columns, types, references_previous)| TableSpec {
            name: format!("t_{name}"),
            columns: columns.into_iter().zip(types).collect(),
            references_previous,
        })
}

fn tables_strategy() -> impl Strategy<Value = Vec<TableSpec>> {
    prop::collection::vec(table_strategy(), 1..5).prop_map(|mut tables| {
        let mut seen = BTreeSet::new();
        tables.retain(|t| seen.insert(t.name.clone()));
        tables
    })
}

fn create_sql(tables: &[TableSpec]) -> String {
    let mut sql = String::new();
    for (i, table) in tables.iter().enumerate() {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .map(|(j, (name, ty))| {
                let pk = if j == 0 { " PRIMARY KEY" } else { "" };
                format!("\"{name}\" {ty}{pk}")
            })
            .collect();
        if i > 0 && table.references_previous {
            let target = &tables[i - 1];
            parts.push(format!(
                "FOREIGN KEY (\"{}\") REFERENCES \"{}\"(\"{}\")",
                table.columns[0].0, target.name, target.columns[0].0
            ));
        }
        sql.push_str(&format!("CREATE TABLE \"{}\" ({});\n", table.name, parts.join(", ")));
    }
    sql
}

// ============================================================================
// Round-trip
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rendered_schema_is_parseable_ddl(tables in tables_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(&create_sql(&tables)).unwrap();
        }

        let schema = extract_schema(&path).unwrap();
        let text = schema.render();
        let reparsed = parse_sql_ddl(&text)
            .map_err(|e| TestCaseError::fail(format!("{e}\n{text}")))?;

        prop_assert_eq!(&reparsed.name, "generated");
        prop_assert_eq!(reparsed.tables.len(), tables.len());
        for (got, want) in reparsed.tables.iter().zip(schema.tables.iter()) {
            prop_assert_eq!(&got.name, &want.name);
            let got_cols: Vec<_> = got.columns.iter().map(|c| (&c.name, &c.data_type, c.primary_key, c.nullable)).collect();
            let want_cols: Vec<_> = want.columns.iter().map(|c| (&c.name, &c.data_type, c.primary_key, c.nullable)).collect();
            prop_assert_eq!(got_cols, want_cols);
            prop_assert_eq!(&got.foreign_keys, &want.foreign_keys);
        }
        prop_assert!(!text.contains(",\n)"), "dangling separator in:\n{}", text);
    }
}
