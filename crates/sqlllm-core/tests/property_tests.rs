//! Property-based tests for the extractor and the retry bound.

use proptest::prelude::*;
use sqlllm_core::{clean_generated_sql, generate_sql, GenerationRequest, ScriptedBackend};

// ============================================================================
// Strategies
// ============================================================================

/// Text that never contains a backtick.
fn plain_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_ ,.;:*=()'\n\t]{0,60}"
}

fn sql_body() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_ ,*=()'\n]{0,40}"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Prose,
    NoRows,
    BadColumn,
    Rows,
}

impl Reply {
    fn text(self) -> &'static str {
        match self {
            Reply::Prose => "I think you want the students",
            Reply::NoRows => "SELECT * FROM students WHERE id < 0",
            Reply::BadColumn => "SELECT shoe_size FROM students",
            Reply::Rows => "```sql\nSELECT name FROM students\n```",
        }
    }
}

fn reply() -> impl Strategy<Value = Reply> {
    prop_oneof![
        Just(Reply::Prose),
        Just(Reply::NoRows),
        Just(Reply::BadColumn),
        Just(Reply::Rows),
    ]
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Extractor
// ============================================================================

proptest! {
    #[test]
    fn last_fenced_block_is_returned(
        prefix in plain_text(),
        first in sql_body(),
        middle in plain_text(),
        last in sql_body(),
        suffix in plain_text(),
    ) {
        let raw = format!("{prefix}```sql\n{first}\n```{middle}```SQL\n{last}\n``` {suffix}");
        prop_assert_eq!(clean_generated_sql(&raw), collapse(&last));
    }

    #[test]
    fn unfenced_text_is_collapsed_and_trimmed(text in plain_text()) {
        let cleaned = clean_generated_sql(&text);
        prop_assert_eq!(&cleaned, &collapse(&text));
        prop_assert!(!cleaned.contains("  "));
    }
}

// ============================================================================
// Retry bound
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn backend_calls_never_exceed_budget(
        max_attempts in 1usize..6,
        replies in prop::collection::vec(reply(), 0..8),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("school.sqlite");
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute_batch(
                "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                 INSERT INTO students (name) VALUES ('Ada');",
            )
            .unwrap();

        let backend = ScriptedBackend::new(replies.iter().map(|r| r.text()));
        let request = GenerationRequest::new(&db, "names?").with_max_attempts(max_attempts);
        let result = generate_sql(&backend, &request).unwrap();

        let expected_calls = replies
            .iter()
            .take(max_attempts)
            .position(|r| *r == Reply::Rows)
            .map_or(max_attempts, |k| k + 1);

        prop_assert!(backend.calls() <= max_attempts);
        prop_assert_eq!(backend.calls(), expected_calls);
        prop_assert_eq!(result.attempts.len(), expected_calls);
        prop_assert_eq!(result.succeeded(), expected_calls <= replies.len()
            && replies[expected_calls - 1] == Reply::Rows);
    }
}
