use crate::config::LlmConfig;
use crate::llm::models::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage};
use crate::llm::{CompletionService, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Ollama chat endpoint. Text only: declared tools are not sent, so the
/// invoker goes straight to its text path.
pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    // Use serde to ignore unknown fields
    #[serde(flatten)]
    extra: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct OllamaMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/chat".to_string());

        let client = reqwest::Client::new();

        Ok(Self { client, api_url })
    }

    fn parse(response_text: &str) -> Result<CompletionResponse, LlmError> {
        let ollama_response = match serde_json::from_str::<OllamaResponse>(response_text) {
            Ok(resp) => resp,
            Err(e) => {
                error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
                return Err(LlmError::ResponseError(format!(
                    "Failed to parse Ollama response: {} - Response was: {}",
                    e, response_text
                )));
            }
        };

        debug!("Ignored Ollama response fields: {:?}", ollama_response.extra.keys());

        let usage = match (ollama_response.prompt_eval_count, ollama_response.eval_count) {
            (None, None) => None,
            (prompt, completion) => {
                let prompt = prompt.unwrap_or(0);
                let completion = completion.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                })
            }
        };

        Ok(CompletionResponse {
            content: ollama_response.message.map(|m| m.content),
            tool_call: None,
            usage,
        })
    }
}

#[async_trait]
impl CompletionService for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        info!("Sending request to Ollama with model: {}", request.model);
        debug!("API URL: {}", self.api_url);

        let body = OllamaRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false, // Explicitly disable streaming
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Try to get the error message from the response body
            let error_body = response.text().await.unwrap_or_default();

            error!("Ollama API responded with status code: {} - {}", status, error_body);
            return Err(LlmError::ApiError {
                status_code: status.as_u16(),
                message: error_body,
            });
        }

        // Get the raw text response first for diagnostics
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Raw response from Ollama: {}", response_text);
        Self::parse(&response_text)
    }

    fn supports_tools(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
