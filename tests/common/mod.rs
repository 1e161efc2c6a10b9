#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nl_sql::config::AppConfig;
use nl_sql::db::{ColumnListing, DatabaseClient, DbError, ForeignKeyListing, Row};
use nl_sql::llm::invoker::{FIX_TOOL, GENERATE_TOOL};
use nl_sql::llm::models::{CompletionRequest, CompletionResponse, TokenUsage, ToolCall};
use nl_sql::llm::templates::Language;
use nl_sql::llm::{CompletionService, LlmError};
use nl_sql::pipeline::cache::{CacheSettings, ResultCache};
use nl_sql::pipeline::orchestrator::{Orchestrator, PipelineSettings};

pub const EXPLANATION: &str = "There are 42 products.";

pub fn usage(total: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: total - 5,
        completion_tokens: 5,
        total_tokens: total,
    }
}

/// One scripted completion.
#[derive(Debug, Clone)]
pub enum Reply {
    Tool { name: &'static str, arguments: String },
    Text(&'static str),
    Fail(LlmError),
}

impl Reply {
    pub fn generate(sql: &str, confidence: f32) -> Self {
        Reply::Tool {
            name: GENERATE_TOOL,
            arguments: json!({"sql": sql, "confidence": confidence, "reasoning": "count rows"})
                .to_string(),
        }
    }

    pub fn fix(sql: &str) -> Self {
        Reply::Tool {
            name: FIX_TOOL,
            arguments: json!({"fixedSql": sql, "reasoning": "use the right column"}).to_string(),
        }
    }
}

/// Completion service answering SQL requests from a queue. Explanation
/// requests are recognised by their system prompt and answered separately.
pub struct ScriptedService {
    replies: Mutex<VecDeque<Reply>>,
    pub tools: bool,
    pub explain_fails: bool,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub explanations: AtomicUsize,
}

impl ScriptedService {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            tools: true,
            explain_fails: false,
            requests: Mutex::new(Vec::new()),
            explanations: AtomicUsize::new(0),
        }
    }

    pub fn text_only(replies: Vec<Reply>) -> Self {
        Self {
            tools: false,
            ..Self::new(replies)
        }
    }

    pub fn failing_explanations(replies: Vec<Reply>) -> Self {
        Self {
            explain_fails: true,
            ..Self::new(replies)
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn is_explanation(request: &CompletionRequest) -> bool {
        let system = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        [Language::English, Language::Italian]
            .iter()
            .any(|l| system == l.templates().explain_system)
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());

        if Self::is_explanation(request) {
            self.explanations.fetch_add(1, Ordering::SeqCst);
            if self.explain_fails {
                return Err(LlmError::ConnectionError("connection reset".to_string()));
            }
            return Ok(CompletionResponse {
                content: Some(EXPLANATION.to_string()),
                tool_call: None,
                usage: Some(usage(20)),
            });
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Tool { name, arguments }) => Ok(CompletionResponse {
                content: None,
                tool_call: Some(ToolCall {
                    name: name.to_string(),
                    arguments,
                }),
                usage: Some(usage(100)),
            }),
            Some(Reply::Text(text)) => Ok(CompletionResponse {
                content: Some(text.to_string()),
                tool_call: None,
                usage: Some(usage(100)),
            }),
            Some(Reply::Fail(e)) => Err(e),
            None => Err(LlmError::ApiError {
                status_code: 429,
                message: "rate limited".to_string(),
            }),
        }
    }

    fn supports_tools(&self) -> bool {
        self.tools
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// In-memory database with a fixed `products(id, name, stock)` schema.
/// Executions are answered from a queue, then from `fallback`.
pub struct MockDatabase {
    results: Mutex<VecDeque<Result<Vec<Row>, DbError>>>,
    fallback: Result<Vec<Row>, DbError>,
    pub fail_metadata: bool,
    pub executed: Mutex<Vec<String>>,
    pub metadata_fetches: AtomicUsize,
}

impl MockDatabase {
    pub fn answering(rows: Vec<Row>) -> Self {
        Self::scripted(Vec::new(), Ok(rows))
    }

    pub fn always_failing(message: &str) -> Self {
        Self::scripted(Vec::new(), Err(DbError::Execution(message.to_string())))
    }

    pub fn scripted(
        results: Vec<Result<Vec<Row>, DbError>>,
        fallback: Result<Vec<Row>, DbError>,
    ) -> Self {
        Self {
            results: Mutex::new(results.into()),
            fallback,
            fail_metadata: false,
            executed: Mutex::new(Vec::new()),
            metadata_fetches: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_metadata: true,
            ..Self::answering(Vec::new())
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

fn column(name: &str, data_type: &str, pk: bool) -> ColumnListing {
    ColumnListing {
        table: "products".to_string(),
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: !pk,
        is_primary_key: pk,
    }
}

#[async_trait]
impl DatabaseClient for MockDatabase {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        self.executed.lock().unwrap().push(sql.to_string());
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn fetch_tables(&self) -> Result<Vec<String>, DbError> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata {
            return Err(DbError::Connection("connection refused".to_string()));
        }
        Ok(vec!["products".to_string()])
    }

    async fn fetch_columns(&self) -> Result<Vec<ColumnListing>, DbError> {
        Ok(vec![
            column("id", "INTEGER", true),
            column("name", "VARCHAR", false),
            column("stock", "INTEGER", false),
        ])
    }

    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKeyListing>, DbError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn count_rows() -> Vec<Row> {
    vec![row(&[("count", json!(42))])]
}

pub fn settings(max_attempts: u32) -> PipelineSettings {
    let mut config = AppConfig::default();
    config.pipeline.max_attempts = max_attempts;
    config.llm.model = "test-model".to_string();
    PipelineSettings::from_config(&config)
}

pub fn cache(max_size: usize) -> Arc<ResultCache> {
    Arc::new(ResultCache::new(CacheSettings {
        enabled: true,
        max_size,
        short_ttl: Duration::from_secs(60),
    }))
}

pub fn orchestrator(
    db: Arc<MockDatabase>,
    service: Arc<ScriptedService>,
    max_attempts: u32,
) -> Orchestrator {
    Orchestrator::new(db, service, cache(100), settings(max_attempts))
}
