use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::db::Row;
use crate::llm::models::{CompletionRequest, UsageLedger};
use crate::llm::prompt::PromptAssembler;
use crate::llm::templates::Language;
use crate::llm::{CompletionService, LlmError};

/// What an explanation is asked for.
#[derive(Debug, Clone, Copy)]
pub struct ExplanationRequest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub rows: &'a [Row],
    pub language: Language,
    /// Step-by-step account instead of a short answer
    pub detailed: bool,
}

/// Turns a result set into prose. Failures are never fatal to the caller,
/// which substitutes a generic message.
#[async_trait]
pub trait ExplanationGenerator: Send + Sync {
    async fn explain(
        &self,
        request: &ExplanationRequest<'_>,
        usage: &mut UsageLedger,
    ) -> Result<String, LlmError>;
}

/// Explanations from the same completion service used for translation.
pub struct LlmExplainer {
    service: Arc<dyn CompletionService>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    row_limit: usize,
}

impl LlmExplainer {
    pub fn new(
        service: Arc<dyn CompletionService>,
        model: String,
        temperature: f32,
        max_tokens: u32,
        row_limit: usize,
    ) -> Self {
        Self {
            service,
            model,
            temperature,
            max_tokens,
            row_limit,
        }
    }
}

#[async_trait]
impl ExplanationGenerator for LlmExplainer {
    async fn explain(
        &self,
        request: &ExplanationRequest<'_>,
        usage: &mut UsageLedger,
    ) -> Result<String, LlmError> {
        let prompt = PromptAssembler::explanation(
            request.question,
            request.sql,
            request.rows,
            self.row_limit,
            request.detailed,
            request.language.templates(),
        );

        let completion = CompletionRequest {
            model: self.model.clone(),
            messages: prompt.into_messages(),
            tools: Vec::new(),
            forced_tool: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self.service.complete(&completion).await?;
        usage.record("explain", response.usage);

        let text = response.content.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            return Err(LlmError::ResponseError(
                "Explanation was empty".to_string(),
            ));
        }

        debug!("Explanation: {}", text);
        Ok(text)
    }
}
