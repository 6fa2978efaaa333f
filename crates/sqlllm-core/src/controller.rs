//! Bounded retry loop: prompt once, then generate -> clean -> validate ->
//! execute until a query returns rows or the attempt budget runs out.
//!
//! Every attempt reuses the same prompt; earlier failures are not fed back to
//! the model. An attempt whose query runs but returns no rows is not a
//! success, so the loop moves on to the next attempt.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlllm_db::{DbError, Row, SqliteDatabase};
use tracing::{debug, info, warn};

use crate::backend::{GenerationBackend, GenerationError};
use crate::extract::clean_generated_sql;
use crate::prompt::build_prompt;
use crate::validate::{validate_sql, SqlSyntaxError};
use crate::CoreError;

/// Returned in place of rows when every attempt failed.
pub const FALLBACK_MESSAGE: &str =
    "I’m having trouble in understanding. Could you please rephrase or simplify your query?";

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// One question to answer against one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    question: String,
    domain_knowledge: Option<String>,
    database: PathBuf,
    max_attempts: usize,
}

impl GenerationRequest {
    pub fn new(database: impl Into<PathBuf>, question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            domain_knowledge: None,
            database: database.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_domain_knowledge(mut self, text: impl Into<String>) -> Self {
        self.domain_knowledge = Some(text.into());
        self
    }

    /// Attempt budget; values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn domain_knowledge(&self) -> Option<&str> {
        self.domain_knowledge.as_deref()
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

/// How a single attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The query ran and returned at least one row.
    Rows(Vec<Row>),
    /// The query ran and returned nothing.
    EmptyResult,
    ParseFailure(SqlSyntaxError),
    ExecutionFailure(DbError),
    BackendFailure(GenerationError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Rows(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::ParseFailure(_)
                | AttemptOutcome::ExecutionFailure(_)
                | AttemptOutcome::BackendFailure(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Rows(_) => "rows",
            AttemptOutcome::EmptyResult => "empty",
            AttemptOutcome::ParseFailure(_) => "parse_failure",
            AttemptOutcome::ExecutionFailure(_) => "execution_failure",
            AttemptOutcome::BackendFailure(_) => "backend_failure",
        }
    }
}

#[derive(Debug)]
pub struct GenerationAttempt {
    /// Zero-based.
    pub index: usize,
    pub raw_output: Option<String>,
    pub candidate: Option<String>,
    pub outcome: AttemptOutcome,
}

impl GenerationAttempt {
    /// `None` when no candidate reached the validator.
    pub fn validated(&self) -> Option<bool> {
        self.candidate.as_ref()?;
        Some(!matches!(self.outcome, AttemptOutcome::ParseFailure(_)))
    }
}

/// What the caller gets instead of a bare "rows or message" value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExecutionPayload {
    Rows(Vec<Row>),
    /// The final attempt ran a query that returned no rows.
    Empty,
    Fallback(String),
}

impl ExecutionPayload {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            ExecutionPayload::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct GenerationResult {
    /// Last cleaned candidate, or empty if no attempt produced one.
    pub sql: String,
    pub payload: ExecutionPayload,
    pub attempts: Vec<GenerationAttempt>,
}

impl GenerationResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.payload, ExecutionPayload::Rows(_))
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Answer `request` with SQL generated by `backend`.
///
/// Only a failure to read the database schema is returned as an error; every
/// per-attempt failure is folded into the result.
pub fn generate_sql(
    backend: &dyn GenerationBackend,
    request: &GenerationRequest,
) -> Result<GenerationResult, CoreError> {
    let db = SqliteDatabase::new(request.database());
    let schema = db.schema()?;
    let prompt = build_prompt(
        &schema.render(),
        request.question(),
        request.domain_knowledge(),
    );

    let max_attempts = request.max_attempts();
    let mut attempts: Vec<GenerationAttempt> = Vec::with_capacity(max_attempts);
    let mut last_candidate: Option<String> = None;

    for index in 0..max_attempts {
        let attempt = run_attempt(backend, &db, &prompt, index, max_attempts);
        if let Some(candidate) = &attempt.candidate {
            last_candidate = Some(candidate.clone());
        }

        if let AttemptOutcome::Rows(rows) = &attempt.outcome {
            info!(
                attempt = index + 1,
                rows = rows.len(),
                "generated query returned rows"
            );
            let payload = ExecutionPayload::Rows(rows.clone());
            attempts.push(attempt);
            return Ok(GenerationResult {
                sql: last_candidate.unwrap_or_default(),
                payload,
                attempts,
            });
        }
        attempts.push(attempt);
    }

    let payload = match attempts.last().map(|a| &a.outcome) {
        Some(AttemptOutcome::EmptyResult) => ExecutionPayload::Empty,
        _ => ExecutionPayload::Fallback(FALLBACK_MESSAGE.to_string()),
    };
    info!(
        attempts = attempts.len(),
        last = attempts.last().map(|a| a.outcome.label()).unwrap_or("none"),
        "attempt budget exhausted"
    );
    Ok(GenerationResult {
        sql: last_candidate.unwrap_or_default(),
        payload,
        attempts,
    })
}

fn run_attempt(
    backend: &dyn GenerationBackend,
    db: &SqliteDatabase,
    prompt: &str,
    index: usize,
    max_attempts: usize,
) -> GenerationAttempt {
    let attempt_no = index + 1;
    debug!(attempt = attempt_no, max_attempts, backend = %backend.describe(), "requesting completion");

    let raw = match backend.generate(prompt) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(attempt = attempt_no, error = %e, "backend call failed");
            return GenerationAttempt {
                index,
                raw_output: None,
                candidate: None,
                outcome: AttemptOutcome::BackendFailure(e),
            };
        }
    };

    let candidate = clean_generated_sql(&raw);
    debug!(attempt = attempt_no, candidate = %candidate, "cleaned candidate");

    let outcome = match validate_sql(&candidate) {
        Err(e) => {
            warn!(attempt = attempt_no, error = %e, "candidate is not valid SQL");
            AttemptOutcome::ParseFailure(e)
        }
        Ok(()) => match db.execute(&candidate) {
            Err(e) => {
                warn!(attempt = attempt_no, error = %e, "candidate failed to execute");
                AttemptOutcome::ExecutionFailure(e)
            }
            Ok(rows) if rows.is_empty() => {
                debug!(attempt = attempt_no, "candidate returned no rows");
                AttemptOutcome::EmptyResult
            }
            Ok(rows) => AttemptOutcome::Rows(rows),
        },
    };

    GenerationAttempt {
        index,
        raw_output: Some(raw),
        candidate: Some(candidate),
        outcome,
    }
}
