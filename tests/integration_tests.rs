//! Cross-crate tests: schema introspection feeding the generation loop and
//! the batch driver over a benchmark-shaped directory.

use std::path::Path;

use sqlllm_core::{
    build_prompt, generate_sql, run_batch, sample_records, BatchOptions, DatasetRecord,
    ExecutionPayload, GenerationRequest, ScriptedBackend,
};
use sqlllm_db::{extract_schema_info, parse_sql_ddl, SqliteDatabase, Value};

fn create_db(root: &Path, db_id: &str, ddl: &str) {
    let dir = root.join(db_id);
    std::fs::create_dir_all(&dir).unwrap();
    let conn = rusqlite::Connection::open(dir.join(format!("{db_id}.sqlite"))).unwrap();
    conn.execute_batch(ddl).unwrap();
}

fn bench_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    create_db(
        root.path(),
        "california_schools",
        r#"CREATE TABLE schools (CDSCode TEXT PRIMARY KEY, "School Name" TEXT, County TEXT);
           CREATE TABLE frpm (CDSCode TEXT REFERENCES schools(CDSCode), "Free Meal Count (K-12)" REAL);
           INSERT INTO schools VALUES ('01', 'Alameda High', 'Alameda'), ('02', 'Fresno Prep', 'Fresno');
           INSERT INTO frpm VALUES ('01', 120.0), ('02', 80.5);"#,
    );
    create_db(
        root.path(),
        "card_games",
        "CREATE TABLE cards (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, rarity TEXT DEFAULT 'common');
         INSERT INTO cards (name, rarity) VALUES ('Goblin', 'common'), ('Dragon', 'mythic');",
    );
    root
}

#[test]
fn rendered_schema_is_parseable_and_in_the_prompt() {
    let root = bench_root();
    let db = SqliteDatabase::resolve(root.path(), "california_schools");

    let ddl = extract_schema_info(db.path()).unwrap();
    let parsed = parse_sql_ddl(&ddl).unwrap();
    assert_eq!(parsed.name, "california_schools");
    assert_eq!(parsed.tables.len(), 2);
    assert_eq!(parsed.foreign_key_count(), 1);
    assert!(ddl.contains("\"School Name\" TEXT"));

    let prompt = build_prompt(&ddl, "Which county has the most schools?", None);
    assert!(prompt.contains(ddl.trim()));
}

#[test]
fn quoted_identifiers_survive_generation() {
    let root = bench_root();
    let db = SqliteDatabase::resolve(root.path(), "california_schools");
    let backend = ScriptedBackend::new([
        r#"```sql
SELECT T1."School Name" FROM schools AS T1
INNER JOIN frpm AS T2 ON T1.CDSCode = T2.CDSCode
ORDER BY T2."Free Meal Count (K-12)" DESC LIMIT 1
```"#,
    ]);
    let request = GenerationRequest::new(db.path(), "Which school serves the most free meals?");

    let result = generate_sql(&backend, &request).unwrap();

    assert_eq!(
        result.payload,
        ExecutionPayload::Rows(vec![vec![Value::Text("Alameda High".to_string())]])
    );
    assert!(!result.sql.contains('\n'));
}

#[test]
fn generated_writes_are_committed() {
    let root = bench_root();
    let db = SqliteDatabase::resolve(root.path(), "card_games");
    let backend = ScriptedBackend::new(["DELETE FROM cards WHERE rarity = 'mythic'"]);
    let request = GenerationRequest::new(db.path(), "Remove mythic cards").with_max_attempts(1);

    let result = generate_sql(&backend, &request).unwrap();

    assert_eq!(result.payload, ExecutionPayload::Empty);
    let remaining = db.execute("SELECT COUNT(*) FROM cards").unwrap();
    assert_eq!(remaining, vec![vec![Value::Integer(1)]]);
}

#[test]
fn seeded_batch_over_two_databases() {
    let root = bench_root();
    let dataset = vec![
        DatasetRecord::new(
            "How many schools are in Fresno?",
            "Fresno is a county",
            "california_schools",
            "SELECT COUNT(*) FROM schools WHERE County = 'Fresno'",
        ),
        DatasetRecord::new(
            "List mythic cards",
            "",
            "card_games",
            "SELECT name FROM cards WHERE rarity = 'mythic'",
        ),
    ];
    let sample = sample_records(&dataset, 30, Some(11));
    assert_eq!(sample.len(), 2);
    assert_eq!(sample, sample_records(&dataset, 30, Some(11)));

    // Same completion for every record: it runs on card_games and fails on
    // california_schools, which has no `cards` table.
    let backend = ScriptedBackend::new(std::iter::repeat("SELECT name FROM cards").take(4));
    let options = BatchOptions {
        db_root: root.path().to_path_buf(),
        max_attempts: 2,
        tag: "bird".to_string(),
    };

    let report = run_batch(&backend, sample.clone(), &options, |_, _| {}).unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.fallback(), 1);
    assert_eq!(backend.calls(), 3);
    for (i, record) in sample.iter().enumerate() {
        assert_eq!(
            report.predictions[&i],
            format!("SELECT name FROM cards\t----- bird -----\t{}", record.db_id)
        );
        assert_eq!(report.gold[i], format!("{}\t{}", record.sql, record.db_id));
    }
    let keys: Vec<String> = report.predictions_json().keys().cloned().collect();
    assert_eq!(keys, vec!["0", "1"]);
}
