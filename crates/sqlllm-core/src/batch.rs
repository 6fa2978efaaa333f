//! Benchmark batch driver.
//!
//! Records are processed one at a time, in sample order. Everything the run
//! produces is collected into a `BatchReport` and handed back to the caller;
//! writing it to disk is the caller's job.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sqlllm_db::SqliteDatabase;
use tracing::{info, warn};

use crate::backend::GenerationBackend;
use crate::controller::{
    generate_sql, ExecutionPayload, GenerationRequest, GenerationResult, DEFAULT_MAX_ATTEMPTS,
};
use crate::CoreError;

/// One benchmark question. Fields we do not use are carried through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub question: String,
    #[serde(default)]
    pub evidence: String,
    pub db_id: String,
    #[serde(rename = "SQL", default)]
    pub sql: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DatasetRecord {
    pub fn new(
        question: impl Into<String>,
        evidence: impl Into<String>,
        db_id: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            evidence: evidence.into(),
            db_id: db_id.into(),
            sql: sql.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Pick `n` records at random, without replacement.
///
/// `n` larger than the dataset takes every record. A seed makes the pick
/// reproducible.
pub fn sample_records(
    records: &[DatasetRecord],
    n: usize,
    seed: Option<u64>,
) -> Vec<DatasetRecord> {
    if n > records.len() {
        warn!(
            requested = n,
            available = records.len(),
            "sample size exceeds dataset, using every record"
        );
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    records.choose_multiple(&mut rng, n).cloned().collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Databases live at `<db_root>/<db_id>/<db_id>.sqlite`.
    pub db_root: PathBuf,
    pub max_attempts: usize,
    /// Benchmark name embedded in every prediction line.
    pub tag: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            db_root: PathBuf::from("data/dev_databases"),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tag: "bird".to_string(),
        }
    }
}

/// `"<sql>\t----- <tag> -----\t<db_id>"`
pub fn format_prediction(sql: &str, tag: &str, db_id: &str) -> String {
    format!("{sql}\t----- {tag} -----\t{db_id}")
}

/// `"<gold sql>\t<db_id>"`
pub fn format_gold(gold_sql: &str, db_id: &str) -> String {
    format!("{gold_sql}\t{db_id}")
}

#[derive(Debug)]
pub struct RecordOutcome {
    pub index: usize,
    pub db_id: String,
    pub result: GenerationResult,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub records: Vec<DatasetRecord>,
    pub outcomes: Vec<RecordOutcome>,
    /// Keyed by position in `records`.
    pub predictions: BTreeMap<usize, String>,
    pub gold: Vec<String>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|p| matches!(p, ExecutionPayload::Rows(_)))
    }

    pub fn empty(&self) -> usize {
        self.count(|p| matches!(p, ExecutionPayload::Empty))
    }

    pub fn fallback(&self) -> usize {
        self.count(|p| matches!(p, ExecutionPayload::Fallback(_)))
    }

    pub fn total_attempts(&self) -> usize {
        self.outcomes.iter().map(|o| o.result.attempt_count()).sum()
    }

    /// Prediction map with string keys, as written to the prediction file.
    pub fn predictions_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.predictions
            .iter()
            .map(|(i, line)| (i.to_string(), serde_json::Value::String(line.clone())))
            .collect()
    }

    fn count(&self, pred: impl Fn(&ExecutionPayload) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|o| pred(&o.result.payload))
            .count()
    }
}

/// Generate SQL for every record, in order.
///
/// `on_progress(done, total)` is called after each record. A database whose
/// schema cannot be read aborts the run.
pub fn run_batch(
    backend: &dyn GenerationBackend,
    records: Vec<DatasetRecord>,
    options: &BatchOptions,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<BatchReport, CoreError> {
    let total = records.len();
    let mut report = BatchReport {
        outcomes: Vec::with_capacity(total),
        gold: Vec::with_capacity(total),
        ..BatchReport::default()
    };

    for (index, record) in records.iter().enumerate() {
        let db = SqliteDatabase::resolve(&options.db_root, &record.db_id);
        let request = GenerationRequest::new(db.path(), record.question.as_str())
            .with_domain_knowledge(record.evidence.as_str())
            .with_max_attempts(options.max_attempts);

        let result = generate_sql(backend, &request).map_err(|e| match e {
            CoreError::Database(source) => CoreError::Record {
                index,
                db_id: record.db_id.clone(),
                source,
            },
            other => other,
        })?;

        report.predictions.insert(
            index,
            format_prediction(&result.sql, &options.tag, &record.db_id),
        );
        report.gold.push(format_gold(&record.sql, &record.db_id));
        report.outcomes.push(RecordOutcome {
            index,
            db_id: record.db_id.clone(),
            result,
        });
        on_progress(index + 1, total);
    }

    info!(
        records = report.len(),
        succeeded = report.succeeded(),
        empty = report.empty(),
        fallback = report.fallback(),
        "batch finished"
    );
    report.records = records;
    Ok(report)
}
