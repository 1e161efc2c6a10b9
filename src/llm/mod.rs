pub mod invoker;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod templates;

use crate::config::LlmConfig;
use crate::llm::models::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),

    #[error("LLM API error: {status_code} - {message}")]
    ApiError { status_code: u16, message: String },

    #[error("LLM response error: {0}")]
    ResponseError(String),

    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::ApiError { status_code: 429, .. })
    }
}

/// A chat completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send one request. A response carries either a tool call or free text,
    /// plus token counts when the backend reports them.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Whether the backend honours declared tools and forced tool calls.
    fn supports_tools(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

pub struct LlmManager {
    service: Arc<dyn CompletionService>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let service: Arc<dyn CompletionService> = match config.backend.as_str() {
            "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self { service })
    }

    pub fn service(&self) -> Arc<dyn CompletionService> {
        Arc::clone(&self.service)
    }
}
