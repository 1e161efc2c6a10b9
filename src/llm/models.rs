use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use crate::llm::templates::Language;

// Few-shot pair shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub question: String,
    pub sql: String,
}

// Everything the prompt for one generation attempt is built from
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub question: String,
    pub language: Language,
    pub schema_description: String,
    pub business_context: Option<String>,
    /// `table.column → table.column` lines
    pub relationships: Vec<String>,
    pub examples: Vec<Example>,
    pub custom_instructions: Vec<String>,
}

// A failed statement handed back to the model for repair
#[derive(Debug, Clone, Copy)]
pub struct CorrectionRequest<'a> {
    pub translation: &'a TranslationRequest,
    pub failed_sql: &'a str,
    pub error: &'a str,
}

// Normalized output of a generation attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult {
    pub sql: String,
    /// Only set when the model answered through the structured path
    pub confidence: Option<f32>,
    pub reasoning: Option<String>,
}

// Normalized output of a correction attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub fixed_sql: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// A callable capability declared to the completion service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    /// Name of the tool the service must call
    pub forced_tool: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON arguments payload
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub usage: Option<TokenUsage>,
}

/// Token usage of one pipeline call, attributed per operation.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    entries: Vec<(&'static str, TokenUsage)>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage if the service reported any.
    pub fn record(&mut self, operation: &'static str, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            self.entries.push((operation, usage));
        }
    }

    pub fn for_operation(&self, operation: &str) -> TokenUsage {
        let mut sum = TokenUsage::default();
        for (op, usage) in &self.entries {
            if *op == operation {
                sum += *usage;
            }
        }
        sum
    }

    pub fn total(&self) -> TokenUsage {
        let mut sum = TokenUsage::default();
        for (_, usage) in &self.entries {
            sum += *usage;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_ledger_attributes_usage() {
        let mut ledger = UsageLedger::new();
        ledger.record("generate", Some(usage(100, 20)));
        ledger.record("correct", Some(usage(150, 30)));
        ledger.record("correct", None);
        ledger.record("correct", Some(usage(10, 5)));

        assert_eq!(ledger.for_operation("generate"), usage(100, 20));
        assert_eq!(ledger.for_operation("correct"), usage(160, 35));
        assert_eq!(ledger.for_operation("explain"), TokenUsage::default());
        assert_eq!(ledger.total().total_tokens, 305);
    }

    #[test]
    fn test_chat_message_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
