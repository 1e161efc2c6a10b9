//! End-to-end question answering.
//!
//! `query` runs schema fetch, cache lookup, generation, the correction
//! loop, explanation and cache store in that order. Only a schema fetch
//! failure or a failure of the very first generation aborts the call;
//! everything after that is reported on the returned outcome.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::db::schema::SchemaSnapshot;
use crate::db::schema_manager::SchemaManager;
use crate::db::{DatabaseClient, Row};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::CompletionService;
use crate::llm::invoker::{InvokerSettings, TranslationInvoker};
use crate::llm::models::{Example, TokenUsage, TranslationRequest, UsageLedger};
use crate::llm::prompt::substitute;
use crate::llm::templates::Language;
use crate::pipeline::cache::ResultCache;
use crate::pipeline::correction::{AttemptRecord, CorrectionLoop};
use crate::pipeline::explain::{ExplanationGenerator, ExplanationRequest, LlmExplainer};
use crate::pipeline::validator::QueryValidator;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Candidates tried per question, counting the first
    pub max_attempts: usize,
    pub language: Language,
    pub business_context: Option<String>,
    pub custom_instructions: Vec<String>,
    pub examples: Vec<Example>,
    pub schema_ttl: Duration,
    pub explanation_row_limit: usize,
    pub invoker: InvokerSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            max_attempts: pipeline.max_attempts.max(1) as usize,
            language: pipeline.language,
            business_context: pipeline.business_context.clone(),
            custom_instructions: pipeline.custom_instructions.clone(),
            examples: pipeline.examples.clone(),
            schema_ttl: pipeline.schema_ttl(),
            explanation_row_limit: pipeline.explanation_row_limit,
            invoker: InvokerSettings::from_config(&config.llm, pipeline.min_sql_length),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub detailed: bool,
    /// Skip the lookup; a successful answer is still stored
    pub bypass_cache: bool,
    /// Overrides the configured response language
    pub language: Option<Language>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    pub detailed: bool,
    pub language: Option<Language>,
}

/// Result of `query`. A failed translation is still an `Ok` outcome with
/// `success == false` and a readable `explanation`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub question: String,
    pub sql: String,
    pub rows: Vec<Row>,
    pub attempts: Vec<AttemptRecord>,
    pub attempt_count: usize,
    pub success: bool,
    /// Model confidence in the first candidate, absent when unknown
    pub confidence: Option<f32>,
    pub explanation: String,
    pub detailed_explanation: Option<String>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub token_usage: TokenUsage,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub error: Option<String>,
}

/// Result of `execute_sql`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub sql: String,
    pub rows: Vec<Row>,
    pub success: bool,
    pub explanation: String,
    pub detailed_explanation: Option<String>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub token_usage: TokenUsage,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub error: Option<String>,
}

pub struct Orchestrator {
    db: Arc<dyn DatabaseClient>,
    schema: SchemaManager,
    invoker: TranslationInvoker,
    validator: QueryValidator,
    explainer: Arc<dyn ExplanationGenerator>,
    cache: Arc<ResultCache>,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn DatabaseClient>,
        completion: Arc<dyn CompletionService>,
        cache: Arc<ResultCache>,
        settings: PipelineSettings,
    ) -> Self {
        let explainer = Arc::new(LlmExplainer::new(
            Arc::clone(&completion),
            settings.invoker.model.clone(),
            settings.invoker.temperature,
            settings.invoker.max_tokens,
            settings.explanation_row_limit,
        ));

        Self {
            schema: SchemaManager::new(Arc::clone(&db), settings.schema_ttl),
            invoker: TranslationInvoker::new(completion, settings.invoker.clone()),
            validator: QueryValidator::new(),
            explainer,
            db,
            cache,
            settings,
        }
    }

    pub fn with_explainer(mut self, explainer: Arc<dyn ExplanationGenerator>) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }

    pub async fn schema(&self) -> PipelineResult<Arc<SchemaSnapshot>> {
        self.schema.snapshot().await.map_err(PipelineError::SchemaFetch)
    }

    pub async fn refresh_schema(&self) -> PipelineResult<Arc<SchemaSnapshot>> {
        self.schema.refresh().await.map_err(PipelineError::SchemaFetch)
    }

    /// Answer a natural-language question.
    pub async fn query(&self, question: &str, options: QueryOptions) -> PipelineResult<QueryOutcome> {
        let started = Instant::now();
        let language = options.language.unwrap_or(self.settings.language);
        let mut usage = UsageLedger::new();
        info!("Processing question: {}", question);

        let schema = self.schema().await?;

        if !options.bypass_cache {
            if let Some(entry) = self.cache.lookup(question, language, schema.fingerprint()) {
                info!("Answered from cache");
                let detailed_explanation = if options.detailed {
                    self.detailed_explanation(question, &entry.sql, &entry.results, language, &mut usage)
                        .await
                } else {
                    None
                };

                return Ok(QueryOutcome {
                    question: question.to_string(),
                    sql: entry.sql,
                    rows: entry.results,
                    attempts: Vec::new(),
                    attempt_count: 0,
                    success: true,
                    confidence: None,
                    explanation: entry.explanation,
                    detailed_explanation,
                    elapsed_ms: elapsed_ms(started),
                    from_cache: true,
                    token_usage: usage.total(),
                    warnings: Vec::new(),
                    suggestions: Vec::new(),
                    error: None,
                });
            }
        }

        let request = self.translation_request(question, language, &schema);
        let translation = self.invoker.translate(&request, &mut usage).await?;

        let outcome = CorrectionLoop::new(
            self.db.as_ref(),
            &self.invoker,
            &self.validator,
            self.settings.max_attempts,
        )
        .run(&request, &schema, translation.sql, &mut usage)
        .await;

        let templates = language.templates();
        if !outcome.success {
            let explanation = substitute(
                templates.failure_message,
                &HashMap::from([("attempts", outcome.attempt_count.to_string())]),
            );
            warn!(
                "Giving up on question after {} attempts: {}",
                outcome.attempt_count,
                outcome.error.as_deref().unwrap_or_default()
            );
            log_usage(&usage);

            return Ok(QueryOutcome {
                question: question.to_string(),
                sql: outcome.sql,
                rows: Vec::new(),
                attempts: outcome.attempts,
                attempt_count: outcome.attempt_count,
                success: false,
                confidence: translation.confidence,
                explanation,
                detailed_explanation: None,
                elapsed_ms: elapsed_ms(started),
                from_cache: false,
                token_usage: usage.total(),
                warnings: outcome.verdict.warnings,
                suggestions: outcome.verdict.suggestions,
                error: outcome.error,
            });
        }

        let explanation = self
            .short_explanation(question, &outcome.sql, &outcome.rows, language, &mut usage)
            .await;
        let detailed_explanation = if options.detailed {
            self.detailed_explanation(question, &outcome.sql, &outcome.rows, language, &mut usage)
                .await
        } else {
            None
        };

        let elapsed = elapsed_ms(started);
        self.cache.store(
            question,
            language,
            schema.fingerprint(),
            &outcome.sql,
            outcome.rows.clone(),
            &explanation,
            elapsed,
        );
        log_usage(&usage);

        Ok(QueryOutcome {
            question: question.to_string(),
            sql: outcome.sql,
            rows: outcome.rows,
            attempts: outcome.attempts,
            attempt_count: outcome.attempt_count,
            success: true,
            confidence: translation.confidence,
            explanation,
            detailed_explanation,
            elapsed_ms: elapsed,
            from_cache: false,
            token_usage: usage.total(),
            warnings: outcome.verdict.warnings,
            suggestions: outcome.verdict.suggestions,
            error: None,
        })
    }

    /// Validate and run caller-supplied SQL. No generation, no correction
    /// and no caching.
    pub async fn execute_sql(&self, sql: &str, options: ExecuteOptions) -> PipelineResult<ExecutionOutcome> {
        let started = Instant::now();
        let language = options.language.unwrap_or(self.settings.language);
        let templates = language.templates();
        let mut usage = UsageLedger::new();

        let schema = self.schema().await?;
        let verdict = self.validator.validate(sql, &schema);

        let failed = |error: String, usage: &UsageLedger, warnings, suggestions| ExecutionOutcome {
            sql: sql.to_string(),
            rows: Vec::new(),
            success: false,
            explanation: substitute(
                templates.rejected_message,
                &HashMap::from([("reason", error.clone())]),
            ),
            detailed_explanation: None,
            elapsed_ms: elapsed_ms(started),
            from_cache: false,
            token_usage: usage.total(),
            warnings,
            suggestions,
            error: Some(error),
        };

        if !verdict.valid {
            info!("Rejected caller SQL: {}", verdict.errors.join("; "));
            return Ok(failed(
                verdict.errors.join("; "),
                &usage,
                verdict.warnings,
                verdict.suggestions,
            ));
        }

        let rows = match self.db.execute(sql).await {
            Ok(rows) => rows,
            Err(e) => {
                info!("Caller SQL failed: {}", e);
                return Ok(failed(e.to_string(), &usage, verdict.warnings, verdict.suggestions));
            }
        };

        let explanation = self
            .short_explanation(sql, sql, &rows, language, &mut usage)
            .await;
        let detailed_explanation = if options.detailed {
            self.detailed_explanation(sql, sql, &rows, language, &mut usage)
                .await
        } else {
            None
        };
        log_usage(&usage);

        Ok(ExecutionOutcome {
            sql: sql.to_string(),
            rows,
            success: true,
            explanation,
            detailed_explanation,
            elapsed_ms: elapsed_ms(started),
            from_cache: false,
            token_usage: usage.total(),
            warnings: verdict.warnings,
            suggestions: verdict.suggestions,
            error: None,
        })
    }

    fn translation_request(
        &self,
        question: &str,
        language: Language,
        schema: &SchemaSnapshot,
    ) -> TranslationRequest {
        TranslationRequest {
            question: question.to_string(),
            language,
            schema_description: schema.describe(),
            business_context: self.settings.business_context.clone(),
            relationships: schema.relationships(),
            examples: self.settings.examples.clone(),
            custom_instructions: self.settings.custom_instructions.clone(),
        }
    }

    /// Short explanation, or the generic row-count message when the
    /// generator fails.
    async fn short_explanation(
        &self,
        question: &str,
        sql: &str,
        rows: &[Row],
        language: Language,
        usage: &mut UsageLedger,
    ) -> String {
        let request = ExplanationRequest {
            question,
            sql,
            rows,
            language,
            detailed: false,
        };

        match self.explainer.explain(&request, usage).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Explanation failed, using fallback: {}", e);
                substitute(
                    language.templates().fallback_explanation,
                    &HashMap::from([("row_count", rows.len().to_string())]),
                )
            }
        }
    }

    async fn detailed_explanation(
        &self,
        question: &str,
        sql: &str,
        rows: &[Row],
        language: Language,
        usage: &mut UsageLedger,
    ) -> Option<String> {
        let request = ExplanationRequest {
            question,
            sql,
            rows,
            language,
            detailed: true,
        };

        self.explainer
            .explain(&request, usage)
            .await
            .map_err(|e| warn!("Detailed explanation failed: {}", e))
            .ok()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn log_usage(usage: &UsageLedger) {
    for operation in ["generate", "correct", "explain"] {
        let tokens = usage.for_operation(operation);
        if tokens.total_tokens > 0 {
            debug!(
                "{} used {} prompt + {} completion tokens",
                operation, tokens.prompt_tokens, tokens.completion_tokens
            );
        }
    }
}
