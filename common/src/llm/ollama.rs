use crate::error::{AskJsonError, Result};
use crate::llm::client::LlmClient;
use crate::llm::config::LlmConfig;
use crate::llm::message::Message;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// client for a local ollama server (`/api/chat`, non-streaming)
pub struct OllamaClient {
    config: LlmConfig,
    label: String,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Message,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            label: config.label(),
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        &self.label
    }

    #[tracing::instrument(skip(self, messages), fields(llm.model = %self.config.model, message_count = messages.len()))]
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/api/chat", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AskJsonError::Transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AskJsonError::Transport(format!(
                "ollama returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AskJsonError::Transport(format!("unreadable ollama response: {}", e)))?;

        tracing::debug!("received {} chars", parsed.message.content.len());
        Ok(parsed.message.content)
    }
}
