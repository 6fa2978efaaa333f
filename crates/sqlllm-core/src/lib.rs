//! Question-to-SQL generation for SQLLLM
//!
//! The pipeline for one question:
//! - Read the database schema and render it as DDL (`sqlllm_db`)
//! - Build a single prompt (`prompt`)
//! - Ask a `GenerationBackend` for a completion, clean it (`extract`),
//!   check its syntax (`validate`) and run it
//! - Retry with the same prompt until a query returns rows or the attempt
//!   budget is spent (`controller`)
//!
//! `batch` runs the pipeline over a sample of benchmark records.

pub mod backend;
pub mod batch;
pub mod controller;
pub mod extract;
pub mod prompt;
pub mod validate;

pub use backend::{GenerationBackend, GenerationError, ScriptedBackend};
pub use batch::{
    format_gold, format_prediction, run_batch, sample_records, BatchOptions, BatchReport,
    DatasetRecord, RecordOutcome,
};
pub use controller::{
    generate_sql, AttemptOutcome, ExecutionPayload, GenerationAttempt, GenerationRequest,
    GenerationResult, DEFAULT_MAX_ATTEMPTS, FALLBACK_MESSAGE,
};
pub use extract::clean_generated_sql;
pub use prompt::build_prompt;
pub use validate::{is_valid_sql, validate_sql, SqlSyntaxError};

use sqlllm_db::DbError;

/// Failures that abort a request or a batch run.
///
/// Per-attempt failures never show up here; they are recorded on the
/// attempt instead.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("record {index} ({db_id}): {source}")]
    Record {
        index: usize,
        db_id: String,
        #[source]
        source: DbError,
    },
}
