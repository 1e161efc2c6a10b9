//! Turns assembled prompts into SQL through the completion service.
//!
//! Each invocation first asks the service to call a declared tool whose
//! arguments carry the SQL. When the service cannot or does not produce a
//! usable tool call, the same prompt is sent again as a plain completion
//! and the SQL is cleaned out of the free text.

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::llm::models::{
    ChatMessage, CompletionRequest, CompletionResponse, Correction, CorrectionRequest,
    ToolSpec, TranslationRequest, TranslationResult, UsageLedger,
};
use crate::llm::prompt::PromptAssembler;
use crate::llm::templates::MessageTemplates;
use crate::llm::{CompletionService, LlmError};

pub const GENERATE_TOOL: &str = "generate_sql";
pub const FIX_TOOL: &str = "fix_sql";

static SQL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(SELECT|SHOW|DESCRIBE|DESC|EXPLAIN|PRAGMA|VALUES|INSERT|UPDATE|DELETE|CREATE|ALTER|DROP)\b",
    )
    .expect("sql start regex")
});

// WITH and FROM also open prose ("With pleasure", "From the schema")
static CTE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*WITH\s*$|^\s*WITH\s+(?:RECURSIVE\b|(?:"[^"]+"|[A-Za-z_]\w*)\s*(?:\([^)]*\)\s*)?AS\b)"#,
    )
    .expect("cte start regex")
});

static FROM_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    let ident = r#"(?:"[^"]+"|[A-Za-z_]\w*)"#;
    Regex::new(&format!(
        r"(?i)^\s*FROM\s+{ident}(?:\s*\.\s*{ident})*(?:\s+(?:AS\s+)?{ident})?\s*(?:;|$|(?:SELECT|WHERE|JOIN|LEFT|INNER|GROUP|ORDER|LIMIT)\b)"
    ))
    .expect("from-first regex")
});

static SQL_CONTINUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:SELECT|FROM|WHERE|JOIN|LEFT|RIGHT|INNER|OUTER|FULL|CROSS|ON|USING|GROUP|ORDER|HAVING|LIMIT|OFFSET|UNION|INTERSECT|EXCEPT|AND|OR|WINDOW|QUALIFY)\b|[),])",
    )
    .expect("sql continuation regex")
});

/// Outcome of one invocation: tool arguments, or SQL cleaned from free text.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation<T> {
    Structured(T),
    Text(String),
}

trait StructuredSql {
    fn sql(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct GenerateArgs {
    sql: String,
    confidence: f32,
    #[serde(default)]
    reasoning: Option<String>,
}

impl StructuredSql for GenerateArgs {
    fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixArgs {
    fixed_sql: String,
    #[serde(default)]
    reasoning: String,
}

impl StructuredSql for FixArgs {
    fn sql(&self) -> &str {
        &self.fixed_sql
    }
}

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Cleaned text shorter than this is replaced by the raw completion
    pub min_sql_length: usize,
}

impl InvokerSettings {
    pub fn from_config(llm: &LlmConfig, min_sql_length: usize) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            min_sql_length,
        }
    }
}

pub struct TranslationInvoker {
    service: Arc<dyn CompletionService>,
    settings: InvokerSettings,
}

impl TranslationInvoker {
    pub fn new(service: Arc<dyn CompletionService>, settings: InvokerSettings) -> Self {
        Self { service, settings }
    }

    /// Generate a SQL candidate for the question.
    pub async fn translate(
        &self,
        request: &TranslationRequest,
        usage: &mut UsageLedger,
    ) -> Result<TranslationResult, LlmError> {
        let templates = request.language.templates();
        let messages = PromptAssembler::generation(request, templates).into_messages();

        let result = match self
            .invoke::<GenerateArgs>("generate", messages, generate_tool(templates), usage)
            .await?
        {
            Invocation::Structured(args) => TranslationResult {
                sql: args.sql.trim().to_string(),
                confidence: Some(args.confidence.clamp(0.0, 1.0)),
                reasoning: args.reasoning.filter(|r| !r.trim().is_empty()),
            },
            Invocation::Text(sql) => TranslationResult {
                sql,
                confidence: None,
                reasoning: None,
            },
        };

        info!("Generated SQL: {}", result.sql);
        Ok(result)
    }

    /// Ask for a fixed version of a statement that failed.
    pub async fn correct(
        &self,
        request: &CorrectionRequest<'_>,
        usage: &mut UsageLedger,
    ) -> Result<Correction, LlmError> {
        let templates = request.translation.language.templates();
        let messages = PromptAssembler::correction(request, templates).into_messages();

        let correction = match self
            .invoke::<FixArgs>("correct", messages, fix_tool(templates), usage)
            .await?
        {
            Invocation::Structured(args) => Correction {
                fixed_sql: args.fixed_sql.trim().to_string(),
                reasoning: if args.reasoning.trim().is_empty() {
                    templates.fallback_reasoning.to_string()
                } else {
                    args.reasoning
                },
            },
            Invocation::Text(sql) => Correction {
                fixed_sql: sql,
                reasoning: templates.fallback_reasoning.to_string(),
            },
        };

        info!("Corrected SQL: {}", correction.fixed_sql);
        Ok(correction)
    }

    async fn invoke<T>(
        &self,
        operation: &'static str,
        messages: Vec<ChatMessage>,
        tool: ToolSpec,
        usage: &mut UsageLedger,
    ) -> Result<Invocation<T>, LlmError>
    where
        T: DeserializeOwned + StructuredSql,
    {
        if self.service.supports_tools() {
            let tool_name = tool.name.clone();
            let request = self.request(messages.clone(), vec![tool], Some(tool_name.clone()));
            let response = self.service.complete(&request).await?;
            usage.record(operation, response.usage);

            match structured_arguments::<T>(&response, &tool_name) {
                Some(args) => return Ok(Invocation::Structured(args)),
                None => debug!(
                    "{} produced no usable {} call, falling back to text",
                    self.service.name(),
                    tool_name
                ),
            }
        }

        let request = self.request(messages, Vec::new(), None);
        let response = self.service.complete(&request).await?;
        usage.record(operation, response.usage);

        let raw = response.content.unwrap_or_default();
        if raw.trim().is_empty() {
            return Err(LlmError::ResponseError(
                "Completion contained no SQL".to_string(),
            ));
        }
        debug!("Raw text completion: {}", raw);

        Ok(Invocation::Text(clean_sql_response(
            &raw,
            self.settings.min_sql_length,
        )))
    }

    fn request(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
        forced_tool: Option<String>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages,
            tools,
            forced_tool,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }
}

fn structured_arguments<T>(response: &CompletionResponse, tool_name: &str) -> Option<T>
where
    T: DeserializeOwned + StructuredSql,
{
    let call = response.tool_call.as_ref().filter(|c| c.name == tool_name)?;
    match serde_json::from_str::<T>(&call.arguments) {
        Ok(args) if !args.sql().trim().is_empty() => Some(args),
        Ok(_) => None,
        Err(e) => {
            debug!("Could not parse {} arguments: {}", tool_name, e);
            None
        }
    }
}

fn generate_tool(templates: &MessageTemplates) -> ToolSpec {
    ToolSpec {
        name: GENERATE_TOOL.to_string(),
        description: templates.generate_tool_description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "sql": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "reasoning": {"type": "string"}
            },
            "required": ["sql", "confidence"]
        }),
    }
}

fn fix_tool(templates: &MessageTemplates) -> ToolSpec {
    ToolSpec {
        name: FIX_TOOL.to_string(),
        description: templates.correct_tool_description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "fixedSql": {"type": "string"},
                "reasoning": {"type": "string"}
            },
            "required": ["fixedSql", "reasoning"]
        }),
    }
}

/// Strip code fences, lead-in prose, trailing prose and whole-line `--`
/// comments from a free-text completion. Quoting characters that belong
/// to identifiers are left alone; only triple-backtick fences are removed.
///
/// When the cleaned text is shorter than `min_length` the trimmed raw text
/// is returned instead.
pub fn clean_sql_response(raw: &str, min_length: usize) -> String {
    let trimmed = raw.trim();
    let body = fenced_block(trimmed).unwrap_or(trimmed);

    let lines: Vec<&str> = body
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect();

    let start = lines.iter().position(|line| starts_statement(line)).unwrap_or(0);
    let end = statement_end(&lines, start);

    let mut cleaned = lines[start..end].join("\n").trim().to_string();
    while cleaned.ends_with(";;") {
        cleaned.pop();
    }

    if cleaned.len() < min_length {
        debug!(
            "Cleaned SQL shorter than {} characters, keeping raw completion",
            min_length
        );
        return trimmed.to_string();
    }

    cleaned
}

/// Whether a line opens a SQL statement rather than a sentence.
fn starts_statement(line: &str) -> bool {
    if line.ends_with(':') {
        return false;
    }
    SQL_START.is_match(line) || CTE_START.is_match(line) || FROM_FIRST.is_match(line)
}

/// One past the last line of the statement opened at `start`: the first
/// line ending in `;`, or the blank line that precedes trailing prose.
fn statement_end(lines: &[&str], start: usize) -> usize {
    for (i, line) in lines.iter().enumerate().skip(start) {
        if line.ends_with(';') {
            return i + 1;
        }
        if line.trim().is_empty() {
            let next = lines[i + 1..].iter().find(|l| !l.trim().is_empty());
            if next.is_some_and(|l| !starts_statement(l) && !SQL_CONTINUATION.is_match(l)) {
                return i;
            }
        }
    }
    lines.len()
}

/// Contents of the first ``` fence, without its language tag line.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map_or(after_open.len(), |i| i + 1);
    let body = &after_open[body_start..];

    match body.find("```") {
        Some(close) => Some(&body[..close]),
        None => Some(body),
    }
}
