//! Execute, and on failure ask the model for a fix, up to a ceiling.
//!
//! Each pass validates the current candidate, executes it when the
//! validator allows, and either finishes or reflects on the failure to
//! produce the next candidate. The loop state is threaded explicitly from
//! one pass to the next.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::schema::SchemaSnapshot;
use crate::db::{DatabaseClient, Row};
use crate::error::AttemptFailure;
use crate::llm::invoker::TranslationInvoker;
use crate::llm::models::{CorrectionRequest, TranslationRequest, UsageLedger};
use crate::pipeline::validator::{QueryValidator, ValidationVerdict};

/// One failed attempt that was handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub error: String,
    pub reasoning: String,
    pub fix_attempt: String,
}

/// Terminal state of the loop. `success == false` is the exhausted state,
/// with no rows and the last candidate as `sql`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub sql: String,
    pub rows: Vec<Row>,
    pub success: bool,
    pub attempts: Vec<AttemptRecord>,
    /// Candidates tried, including the first one
    pub attempt_count: usize,
    /// Validator output for the last candidate
    pub verdict: ValidationVerdict,
    /// Why the last candidate failed, when it did
    pub error: Option<String>,
}

#[derive(Debug)]
struct LoopState {
    sql: String,
    attempts: Vec<AttemptRecord>,
    tried: usize,
}

enum Step {
    Continue(LoopState),
    Done(LoopOutcome),
}

pub struct CorrectionLoop<'a> {
    db: &'a dyn DatabaseClient,
    invoker: &'a TranslationInvoker,
    validator: &'a QueryValidator,
    max_attempts: usize,
}

impl<'a> CorrectionLoop<'a> {
    pub fn new(
        db: &'a dyn DatabaseClient,
        invoker: &'a TranslationInvoker,
        validator: &'a QueryValidator,
        max_attempts: usize,
    ) -> Self {
        Self {
            db,
            invoker,
            validator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run the loop starting from an already generated candidate.
    pub async fn run(
        &self,
        request: &TranslationRequest,
        schema: &SchemaSnapshot,
        initial_sql: String,
        usage: &mut UsageLedger,
    ) -> LoopOutcome {
        let mut state = LoopState {
            sql: initial_sql,
            attempts: Vec::new(),
            tried: 0,
        };

        loop {
            match self.step(state, request, schema, usage).await {
                Step::Continue(next) => state = next,
                Step::Done(outcome) => return outcome,
            }
        }
    }

    async fn step(
        &self,
        state: LoopState,
        request: &TranslationRequest,
        schema: &SchemaSnapshot,
        usage: &mut UsageLedger,
    ) -> Step {
        let LoopState {
            sql,
            mut attempts,
            tried,
        } = state;
        let tried = tried + 1;

        let verdict = self.validator.validate(&sql, schema);
        let failure = if verdict.valid {
            match self.db.execute(&sql).await {
                Ok(rows) => {
                    info!("Attempt {} succeeded with {} rows", tried, rows.len());
                    return Step::Done(LoopOutcome {
                        sql,
                        rows,
                        success: true,
                        attempts,
                        attempt_count: tried,
                        verdict,
                        error: None,
                    });
                }
                Err(e) => AttemptFailure::Execution(e.to_string()),
            }
        } else {
            AttemptFailure::ValidationRejected(verdict.errors.clone())
        };

        info!("Attempt {} of {} failed: {}", tried, self.max_attempts, failure);

        let error = failure.to_string();
        if tried >= self.max_attempts {
            return Step::Done(exhausted(sql, attempts, tried, verdict, error));
        }

        let correction = CorrectionRequest {
            translation: request,
            failed_sql: &sql,
            error: &error,
        };

        match self.invoker.correct(&correction, usage).await {
            Ok(fix) => {
                debug!("Reflection: {}", fix.reasoning);
                attempts.push(AttemptRecord {
                    error,
                    reasoning: fix.reasoning,
                    fix_attempt: fix.fixed_sql.clone(),
                });
                Step::Continue(LoopState {
                    sql: fix.fixed_sql,
                    attempts,
                    tried,
                })
            }
            Err(e) => {
                warn!("Correction request failed, giving up: {}", e);
                attempts.push(AttemptRecord {
                    error: error.clone(),
                    reasoning: AttemptFailure::Translation(e.to_string()).to_string(),
                    fix_attempt: sql.clone(),
                });
                Step::Done(exhausted(sql, attempts, tried, verdict, error))
            }
        }
    }
}

fn exhausted(
    sql: String,
    attempts: Vec<AttemptRecord>,
    tried: usize,
    verdict: ValidationVerdict,
    error: String,
) -> LoopOutcome {
    LoopOutcome {
        sql,
        rows: Vec::new(),
        success: false,
        attempts,
        attempt_count: tried,
        verdict,
        error: Some(error),
    }
}
