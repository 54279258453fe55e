use crate::error::{AskJsonError, Result};
use crate::llm::client::LlmClient;
use crate::llm::config::LlmConfig;
use crate::llm::message::{Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// client for the anthropic `/v1/messages` endpoint
pub struct AnthropicClient {
    config: LlmConfig,
    label: String,
    client: Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a Message>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(AskJsonError::Config(
                "anthropic client requires an api key".to_string(),
            ));
        }

        Ok(Self {
            label: config.label(),
            config,
            client: Client::new(),
        })
    }

    /// system turns travel in a separate field; the rest stay in order
    fn build_request<'a>(&'a self, messages: &'a [Message]) -> MessagesRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .collect(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.label
    }

    #[tracing::instrument(skip(self, messages), fields(llm.model = %self.config.model, message_count = messages.len()))]
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let request = self.build_request(messages);

        let mut builder = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AskJsonError::Transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AskJsonError::Transport(format!(
                "anthropic returned {}: {}",
                status, body
            )));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            AskJsonError::Transport(format!("unreadable anthropic response: {}", e))
        })?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AskJsonError::Transport(
                "anthropic response had no text content".to_string(),
            ));
        }

        tracing::debug!("received {} chars", text.len());
        Ok(text)
    }
}
