use crate::error::{AskJsonError, Result};
use crate::llm::client::LlmClient;
use crate::llm::config::LlmConfig;
use crate::llm::message::Message;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// client for openai-compatible `/chat/completions` endpoints
pub struct OpenAiClient {
    config: LlmConfig,
    label: String,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(AskJsonError::Config(
                "openai client requires an api key".to_string(),
            ));
        }

        Ok(Self {
            label: config.label(),
            config,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.label
    }

    #[tracing::instrument(skip(self, messages), fields(llm.model = %self.config.model, message_count = messages.len()))]
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AskJsonError::Transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AskJsonError::Transport(format!(
                "openai returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AskJsonError::Transport(format!("unreadable openai response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AskJsonError::Transport("openai response had no choices".to_string()))?;

        tracing::debug!("received {} chars", text.len());
        Ok(text)
    }
}
